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

//! Collection and segment descriptors of the legacy deployment (`meta.json`)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::core::error::{MigrationError, Result};
use crate::core::storage_layout;
use crate::storage::StorageClient;

/// One immutable segment of a legacy collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub collection: String,
    pub segment: String,
    pub dim: usize,
    pub rows: usize,
    #[serde(rename = "fileSize", default)]
    pub file_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub collection: String,
    /// Legacy metric code
    pub metric: i32,
    pub rows: usize,
    pub dim: usize,
    #[serde(default)]
    pub segments: Vec<SegmentInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaJson {
    #[serde(default)]
    pub collections: Vec<CollectionMeta>,
    #[serde(default)]
    pub rows: usize,
}

impl MetaJson {
    pub fn all_segments(&self) -> Vec<SegmentInfo> {
        self.collections
            .iter()
            .flat_map(|c| c.segments.iter().cloned())
            .collect()
    }

    /// Keep only the named collections; every name must exist
    pub fn filtered(self, names: &[String]) -> Result<MetaJson> {
        if names.is_empty() {
            tracing::warn!("⚠️ [META] No collection filter, migrating every collection");
            return Ok(self);
        }

        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        let collections: Vec<CollectionMeta> = self
            .collections
            .into_iter()
            .filter(|c| wanted.contains(c.collection.as_str()))
            .collect();

        for name in names {
            if !collections.iter().any(|c| &c.collection == name) {
                return Err(MigrationError::Metadata(format!(
                    "no required collection exists, collection={}",
                    name
                )));
            }
        }

        let rows = collections.iter().map(|c| c.rows).sum();
        Ok(MetaJson { collections, rows })
    }
}

/// Target-side metric names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricType {
    #[serde(rename = "L2")]
    L2,
    #[serde(rename = "IP")]
    Ip,
}

impl MetricType {
    /// Map a legacy metric code: 1 → L2, 2 → IP
    pub fn from_legacy(code: i32) -> Result<Self> {
        match code {
            1 => Ok(MetricType::L2),
            2 => Ok(MetricType::Ip),
            other => Err(MigrationError::Metadata(format!("unsupported metric type {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::L2 => "L2",
            MetricType::Ip => "IP",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn read_meta(&self) -> Result<MetaJson>;
}

/// Reads `meta.json` through a storage client
pub struct JsonMetaProvider {
    storage: Arc<dyn StorageClient>,
    meta_file: String,
    filter: Vec<String>,
}

impl JsonMetaProvider {
    pub fn new(storage: Arc<dyn StorageClient>, meta_file: impl Into<String>) -> Self {
        Self {
            storage,
            meta_file: meta_file.into(),
            filter: Vec::new(),
        }
    }

    pub fn with_filter(mut self, collections: Vec<String>) -> Self {
        self.filter = collections;
        self
    }
}

#[async_trait]
impl MetadataProvider for JsonMetaProvider {
    async fn read_meta(&self) -> Result<MetaJson> {
        tracing::info!("📖 [META] Reading {} via {}", self.meta_file, self.storage.storage_type());
        let bytes = self.storage.read_to_vec(&self.meta_file).await?;
        let meta: MetaJson = serde_json::from_slice(&bytes)
            .map_err(|e| MigrationError::Metadata(format!("invalid {}: {}", self.meta_file, e)))?;

        if meta.collections.is_empty() {
            return Err(MigrationError::Metadata("read meta collection is empty".to_string()));
        }

        let meta = meta.filtered(&self.filter)?;
        tracing::info!(
            "📊 [META] Total rows={} collections={}",
            meta.rows,
            meta.collections.len()
        );
        for collection in &meta.collections {
            tracing::info!(
                "📊 [META] Collection {} rows={} segments={}",
                collection.collection,
                collection.rows,
                collection.segments.len()
            );
        }
        Ok(meta)
    }
}

/// Persist the resolved meta under the output directory; returns its key
pub async fn write_meta(storage: &dyn StorageClient, output_dir: &str, meta: &MetaJson) -> Result<String> {
    let key = storage_layout::output_meta_path(output_dir);
    let json = serde_json::to_vec(meta)
        .map_err(|e| MigrationError::Metadata(format!("cannot serialize meta: {}", e)))?;

    let mut body: &[u8] = &json;
    storage.upload_object(&key, &mut body).await?;
    tracing::info!("✅ [META] Wrote {}", key);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    const META: &str = r#"{
        "collections": [
            {"collection": "books", "metric": 1, "rows": 8, "dim": 4,
             "segments": [
                {"collection": "books", "segment": "1001", "dim": 4, "rows": 5, "fileSize": 100},
                {"collection": "books", "segment": "1002", "dim": 4, "rows": 3, "fileSize": 60}
             ]},
            {"collection": "songs", "metric": 2, "rows": 2, "dim": 8,
             "segments": [
                {"collection": "songs", "segment": "2001", "dim": 8, "rows": 2, "fileSize": 80}
             ]}
        ],
        "rows": 10
    }"#;

    #[test]
    fn test_all_segments_and_filter() {
        let meta: MetaJson = serde_json::from_str(META).unwrap();
        assert_eq!(meta.all_segments().len(), 3);

        let filtered = meta.clone().filtered(&["songs".to_string()]).unwrap();
        assert_eq!(filtered.collections.len(), 1);
        assert_eq!(filtered.rows, 2);

        assert!(meta.filtered(&["missing".to_string()]).is_err());
    }

    #[test]
    fn test_metric_conversion() {
        assert_eq!(MetricType::from_legacy(1).unwrap(), MetricType::L2);
        assert_eq!(MetricType::from_legacy(2).unwrap().as_str(), "IP");
        assert!(matches!(MetricType::from_legacy(3), Err(MigrationError::Metadata(_))));
    }

    #[tokio::test]
    async fn test_read_and_write_meta() {
        let temp_dir = TempDir::new().unwrap();
        let storage: Arc<dyn StorageClient> = Arc::new(LocalStorage::with_root(temp_dir.path()).unwrap());
        let mut body: &[u8] = META.as_bytes();
        storage.upload_object("src/meta.json", &mut body).await.unwrap();

        let meta = JsonMetaProvider::new(storage.clone(), "src/meta.json")
            .read_meta()
            .await
            .unwrap();
        let key = write_meta(storage.as_ref(), "out", &meta).await.unwrap();
        assert_eq!(key, "out/meta.json");

        let reread = JsonMetaProvider::new(storage, key).read_meta().await.unwrap();
        assert_eq!(reread, meta);
    }

    #[tokio::test]
    async fn test_empty_meta_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let storage: Arc<dyn StorageClient> = Arc::new(LocalStorage::with_root(temp_dir.path()).unwrap());
        let mut body: &[u8] = br#"{"collections": [], "rows": 0}"#;
        storage.upload_object("meta.json", &mut body).await.unwrap();

        let err = JsonMetaProvider::new(storage, "meta.json").read_meta().await.unwrap_err();
        assert!(matches!(err, MigrationError::Metadata(_)));
    }
}
