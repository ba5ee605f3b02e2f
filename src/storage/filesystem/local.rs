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

//! Local filesystem storage backend

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};

use super::{ObjectReader, StorageClient, StorageError, StorageResult};

/// Keys are filesystem paths, resolved against an optional root directory
#[derive(Debug, Default, Clone)]
pub struct LocalStorage {
    root_dir: Option<PathBuf>,
}

impl LocalStorage {
    pub fn new() -> Self {
        Self { root_dir: None }
    }

    /// Storage rooted at `root_dir`; relative keys resolve beneath it
    pub fn with_root(root_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let root_dir = root_dir.into();
        if !root_dir.is_dir() {
            return Err(StorageError::Config(format!(
                "Root path is not a directory: {}",
                root_dir.display()
            )));
        }
        Ok(Self {
            root_dir: Some(root_dir),
        })
    }

    fn resolve_path(&self, key: &str) -> PathBuf {
        let path_buf = PathBuf::from(key);

        match self.root_dir {
            Some(ref root_dir) if !path_buf.is_absolute() => root_dir.join(path_buf),
            _ => path_buf,
        }
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn get_object(&self, key: &str) -> StorageResult<ObjectReader> {
        let resolved_path = self.resolve_path(key);
        tracing::debug!("📖 Opening local object {}", resolved_path.display());

        let file = fs::File::open(&resolved_path)
            .await
            .map_err(|e| StorageError::from_io(e, &resolved_path.display().to_string()))?;
        Ok(Box::pin(file))
    }

    async fn upload_object(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<u64> {
        let resolved_path = self.resolve_path(key);

        if let Some(parent) = resolved_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file = fs::File::create(&resolved_path)
            .await
            .map_err(|e| StorageError::from_io(e, &resolved_path.display().to_string()))?;
        let mut writer = BufWriter::new(file);
        let written = tokio::io::copy(reader, &mut writer).await?;
        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        tracing::debug!(
            "✅ Wrote {} bytes successfully to {}",
            written,
            resolved_path.display()
        );
        Ok(written)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(fs::try_exists(self.resolve_path(key)).await?)
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()> {
        let resolved_path = self.resolve_path(prefix);

        let metadata = match fs::symlink_metadata(&resolved_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("🚮 Nothing to delete at {}", resolved_path.display());
                return Ok(());
            }
            Err(e) => return Err(StorageError::from_io(e, &resolved_path.display().to_string())),
        };

        if metadata.is_dir() {
            fs::remove_dir_all(&resolved_path).await?;
        } else {
            fs::remove_file(&resolved_path).await?;
        }
        tracing::debug!("🗑️ Deleted {}", resolved_path.display());
        Ok(())
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage_upload_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::with_root(temp_dir.path()).unwrap();

        let mut body: &[u8] = b"Hello, vecmigrate!";
        let written = storage
            .upload_object("tables/c1/s1/data.npy", &mut body)
            .await
            .unwrap();
        assert_eq!(written, 18);
        assert!(storage.exists("tables/c1/s1/data.npy").await.unwrap());

        let data = storage.read_to_vec("tables/c1/s1/data.npy").await.unwrap();
        assert_eq!(data, b"Hello, vecmigrate!");
    }

    #[tokio::test]
    async fn test_local_storage_missing_object() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::with_root(temp_dir.path()).unwrap();

        let result = storage.get_object("nope.rv").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert!(!storage.exists("nope.rv").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_storage_delete_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::with_root(temp_dir.path()).unwrap();

        let mut body: &[u8] = b"x";
        storage.upload_object("out/a/id.npy", &mut body).await.unwrap();
        let mut body: &[u8] = b"y";
        storage.upload_object("out/b/id.npy", &mut body).await.unwrap();

        storage.delete_prefix("out").await.unwrap();
        assert!(!storage.exists("out/a/id.npy").await.unwrap());
        assert!(!storage.exists("out").await.unwrap());

        // Already gone
        storage.delete_prefix("out").await.unwrap();
    }
}
