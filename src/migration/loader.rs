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

//! Load phase: create target collections and hand dumped files to the submitter

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::DumpMode;
use crate::core::error::{MigrationError, Result};
use crate::core::storage_layout;
use crate::dbclient::{BulkInsertClient, CollectionSpec};
use crate::meta::{JsonMetaProvider, MetaJson, MetadataProvider, MetricType};
use crate::storage::StorageClient;
use crate::task::{FileGroup, Submitter};

const CREATE_COLLECTION_ATTEMPTS: usize = 5;
const CREATE_COLLECTION_BACKOFF: Duration = Duration::from_secs(2);

pub struct Loader {
    client: Arc<dyn BulkInsertClient>,
    mode: DumpMode,
    output_dir: String,
    retry_backoff: Duration,
}

impl Loader {
    pub fn new(client: Arc<dyn BulkInsertClient>, mode: DumpMode, output_dir: impl Into<String>) -> Self {
        Self {
            client,
            mode,
            output_dir: output_dir.into(),
            retry_backoff: CREATE_COLLECTION_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Read the `meta.json` a previous dump left in the output directory
    pub async fn read_dumped_meta(&self, target: Arc<dyn StorageClient>, filter: Vec<String>) -> Result<MetaJson> {
        let key = storage_layout::output_meta_path(&self.output_dir);
        JsonMetaProvider::new(target, key).with_filter(filter).read_meta().await
    }

    /// Create every collection of `meta` that does not exist yet
    pub async fn prepare_collections(&self, meta: &MetaJson) -> Result<()> {
        for collection in &meta.collections {
            let spec = CollectionSpec {
                name: collection.collection.clone(),
                dim: collection.dim,
                metric: MetricType::from_legacy(collection.metric)?,
            };
            self.ensure_with_retry(&spec).await?;
        }
        Ok(())
    }

    async fn ensure_with_retry(&self, spec: &CollectionSpec) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.client.ensure_collection(spec).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < CREATE_COLLECTION_ATTEMPTS => {
                    tracing::warn!(
                        "⚠️ [LOADER] Creating collection {} failed (attempt {}/{}): {}",
                        spec.name,
                        attempt,
                        CREATE_COLLECTION_ATTEMPTS,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Output file groups for the dumped collections, one bulk-insert job each
    pub fn file_groups(&self, meta: &MetaJson) -> Vec<FileGroup> {
        match self.mode {
            DumpMode::Segment => meta
                .all_segments()
                .iter()
                .map(|segment| {
                    FileGroup::new(
                        storage_layout::output_segment_dir(&self.output_dir, segment),
                        segment.collection.clone(),
                        vec![
                            storage_layout::output_id_path(&self.output_dir, segment),
                            storage_layout::output_vector_path(&self.output_dir, segment),
                        ],
                    )
                })
                .collect(),
            DumpMode::LegacyIndex => meta
                .collections
                .iter()
                .map(|collection| {
                    FileGroup::new(
                        storage_layout::join_key(&[&self.output_dir, &collection.collection]),
                        collection.collection.clone(),
                        vec![
                            storage_layout::output_index_id_path(&self.output_dir, &collection.collection),
                            storage_layout::output_index_vector_path(&self.output_dir, &collection.collection),
                        ],
                    )
                })
                .collect(),
        }
    }

    /// Commit every dumped file group
    pub async fn load(&self, meta: &MetaJson, submitter: &Submitter) -> Result<usize> {
        let groups = self.file_groups(meta);
        if groups.is_empty() {
            return Err(MigrationError::Metadata("nothing to load".to_string()));
        }

        tracing::info!("🚀 [LOADER] Loading {} file groups", groups.len());
        let count = groups.len();
        for group in groups {
            submitter.commit(group).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskId;
    use crate::dbclient::BulkInsertState;
    use crate::meta::{CollectionMeta, SegmentInfo};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FlakyClient {
        failures_left: Mutex<usize>,
        created: Mutex<Vec<CollectionSpec>>,
    }

    #[async_trait]
    impl BulkInsertClient for FlakyClient {
        async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
            let mut failures_left = self.failures_left.lock();
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(MigrationError::BulkLoad("connection refused".to_string()));
            }
            self.created.lock().push(spec.clone());
            Ok(())
        }

        async fn submit_bulk_insert(&self, _collection: &str, _files: &[String]) -> Result<TaskId> {
            Ok("1".to_string())
        }

        async fn get_state(&self, _task_id: &TaskId) -> Result<BulkInsertState> {
            Ok(BulkInsertState::Completed)
        }
    }

    fn meta() -> MetaJson {
        MetaJson {
            collections: vec![CollectionMeta {
                collection: "books".to_string(),
                metric: 2,
                rows: 5,
                dim: 4,
                segments: vec![
                    SegmentInfo {
                        collection: "books".to_string(),
                        segment: "1".to_string(),
                        dim: 4,
                        rows: 3,
                        file_size: 0,
                    },
                    SegmentInfo {
                        collection: "books".to_string(),
                        segment: "2".to_string(),
                        dim: 4,
                        rows: 2,
                        file_size: 0,
                    },
                ],
            }],
            rows: 5,
        }
    }

    #[tokio::test]
    async fn test_prepare_collections_retries_then_creates() {
        let client = Arc::new(FlakyClient {
            failures_left: Mutex::new(2),
            ..Default::default()
        });
        let loader = Loader::new(client.clone(), DumpMode::Segment, "out").with_retry_backoff(Duration::from_millis(1));

        loader.prepare_collections(&meta()).await.unwrap();
        let created = client.created.lock();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].metric, MetricType::Ip);
    }

    #[tokio::test]
    async fn test_prepare_collections_gives_up() {
        let client = Arc::new(FlakyClient {
            failures_left: Mutex::new(CREATE_COLLECTION_ATTEMPTS),
            ..Default::default()
        });
        let loader = Loader::new(client, DumpMode::Segment, "out").with_retry_backoff(Duration::from_millis(1));
        assert!(matches!(
            loader.prepare_collections(&meta()).await,
            Err(MigrationError::BulkLoad(_))
        ));
    }

    #[test]
    fn test_file_groups_per_mode() {
        let client = Arc::new(FlakyClient::default());
        let segments = Loader::new(client.clone(), DumpMode::Segment, "out").file_groups(&meta());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].files[0], "out/tables/books/2/id.npy");

        let index = Loader::new(client, DumpMode::LegacyIndex, "out").file_groups(&meta());
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].files[1], "out/books/data.npy");
    }
}
