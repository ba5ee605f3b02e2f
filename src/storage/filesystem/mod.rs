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

//! Object storage abstraction for migration sources and targets
//!
//! Two backends sit behind one `StorageClient` strategy:
//! - local - a directory tree on the local filesystem
//! - s3    - Amazon S3 or any S3-compatible store (MinIO etc.)
//!
//! Clients are built and cached by a `StorageRegistry` that is owned by a
//! single migration run and handed to the components that need it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Error as IoError;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

pub mod local;
pub mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

use crate::core::config::{RemoteConfig, StorageMode};

/// Storage operation result type
pub type StorageResult<T> = Result<T, StorageError>;

/// Streaming body of a stored object
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported storage scheme: {0}")]
    UnsupportedScheme(String),
}

impl StorageError {
    /// Classify an I/O error raised while touching `path`
    pub(crate) fn from_io(err: IoError, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
            _ => StorageError::Io(err),
        }
    }
}

/// Object operations the migration needs from a storage backend
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Open an object for streaming reads
    async fn get_object(&self, key: &str) -> StorageResult<ObjectReader>;

    /// Store everything `reader` yields under `key`, returning the byte count
    async fn upload_object(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<u64>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Remove every object under `prefix`; a missing prefix is not an error
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()>;

    /// Read a small object fully into memory
    async fn read_to_vec(&self, key: &str) -> StorageResult<Vec<u8>> {
        let mut reader = self.get_object(key).await?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        Ok(data)
    }

    /// Backend identifier used in logs
    fn storage_type(&self) -> &'static str;
}

/// Storage clients for one migration run
///
/// The local backend is shared by every local source and target. Remote
/// backends are built lazily and cached per connection settings.
pub struct StorageRegistry {
    local: Arc<LocalStorage>,
    remotes: Mutex<HashMap<RemoteConfig, Arc<dyn StorageClient>>>,
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self {
            local: Arc::new(LocalStorage::new()),
            remotes: Mutex::new(HashMap::new()),
        }
    }

    /// Registry whose remote lookups resolve to a pre-built client
    pub fn with_remote(remote: RemoteConfig, client: Arc<dyn StorageClient>) -> Self {
        let registry = Self::new();
        registry.remotes.lock().insert(remote, client);
        registry
    }

    pub fn local(&self) -> Arc<dyn StorageClient> {
        self.local.clone()
    }

    /// Resolve the client for a source or target section
    pub async fn client_for(
        &self,
        mode: StorageMode,
        remote: Option<&RemoteConfig>,
    ) -> StorageResult<Arc<dyn StorageClient>> {
        match mode {
            StorageMode::Local => Ok(self.local()),
            StorageMode::Remote => {
                let remote = remote.ok_or_else(|| {
                    StorageError::Config("remote storage mode without remote settings".to_string())
                })?;
                self.remote(remote).await
            }
        }
    }

    async fn remote(&self, remote: &RemoteConfig) -> StorageResult<Arc<dyn StorageClient>> {
        if let Some(client) = self.remotes.lock().get(remote) {
            return Ok(client.clone());
        }

        tracing::debug!("🔌 Building S3 client for bucket {}", remote.bucket);
        let built: Arc<dyn StorageClient> = Arc::new(S3Storage::new(remote).await?);

        // A concurrent build for the same settings may have won the race
        let mut remotes = self.remotes.lock();
        Ok(remotes.entry(remote.clone()).or_insert(built).clone())
    }

    pub fn cached_remotes(&self) -> usize {
        self.remotes.lock().len()
    }
}
