/*
 * Copyright 2025 Vijaykumar Singh
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Consumer side of a worker

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::core::error::Result;
use crate::storage::StorageClient;

#[async_trait]
pub trait Sink: Send {
    /// Destination name for logs
    fn target(&self) -> &str;

    /// Drain `reader` to end-of-stream, returning the bytes stored
    async fn execute(&mut self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64>;
}

/// Uploads the stream as one object
pub struct ObjectSink {
    storage: Arc<dyn StorageClient>,
    key: String,
}

impl ObjectSink {
    pub fn new(storage: Arc<dyn StorageClient>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }
}

#[async_trait]
impl Sink for ObjectSink {
    fn target(&self) -> &str {
        &self.key
    }

    async fn execute(&mut self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        tracing::debug!("📤 [SINK] Uploading to {} via {}", self.key, self.storage.storage_type());
        let written = self.storage.upload_object(&self.key, reader).await?;
        tracing::info!("✅ [SINK] Stored {} bytes at {}", written, self.key);
        Ok(written)
    }
}
