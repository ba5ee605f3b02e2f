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

use std::sync::Arc;

use crate::core::error::{MigrationError, Result};
use crate::storage::StorageClient;

/// Removes the dumped output once it has been loaded
pub struct Cleaner {
    storage: Arc<dyn StorageClient>,
    output_dir: String,
}

impl Cleaner {
    pub fn new(storage: Arc<dyn StorageClient>, output_dir: impl Into<String>) -> Self {
        Self {
            storage,
            output_dir: output_dir.into(),
        }
    }

    pub async fn clean(&self) -> Result<()> {
        let prefix = self.output_dir.trim();
        if prefix.is_empty() || prefix == "/" {
            return Err(MigrationError::Validation(format!(
                "refusing to clean output prefix '{}'",
                self.output_dir
            )));
        }

        tracing::info!("🧹 [CLEANER] Removing {} via {}", prefix, self.storage.storage_type());
        self.storage.delete_prefix(prefix).await?;
        Ok(())
    }
}
