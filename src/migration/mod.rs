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

//! Dump and load orchestration for one migration job
//!
//! `run` is the full pipeline: collections are prepared, the submitter is
//! started, the dumper commits each finished file group as it goes, and the
//! submitter is closed once the dump is done. `dump` and `load` run one
//! phase alone; `load` picks up the `meta.json` a previous dump wrote.

pub mod cleaner;
pub mod dumper;
pub mod loader;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::config::MigrationConfig;
use crate::core::error::{MigrationError, Result};
use crate::dbclient::BulkInsertClient;
use crate::storage::{StorageClient, StorageRegistry};
use crate::task::{JobStatus, JobTracker, Submitter};

pub use cleaner::Cleaner;
pub use dumper::Dumper;
pub use loader::Loader;

pub struct Migration {
    config: MigrationConfig,
    registry: StorageRegistry,
    client: Arc<dyn BulkInsertClient>,
    tracker: Arc<JobTracker>,
    cancel: CancellationToken,
}

impl Migration {
    pub fn new(config: MigrationConfig, client: Arc<dyn BulkInsertClient>, job_id: Option<String>) -> Self {
        Self {
            config,
            registry: StorageRegistry::new(),
            client,
            tracker: Arc::new(JobTracker::new(job_id)),
            cancel: CancellationToken::new(),
        }
    }

    /// Use pre-built storage clients instead of building them from config
    pub fn with_registry(mut self, registry: StorageRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn tracker(&self) -> Arc<JobTracker> {
        self.tracker.clone()
    }

    /// Cancelling this token aborts a running job
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> JobStatus {
        self.tracker.status()
    }

    /// Dump and load
    pub async fn run(&self) -> Result<JobStatus> {
        self.tracker.start();
        let result = self.run_inner().await;
        self.finish(result)
    }

    /// Dump only; the output can be loaded later with [`Migration::load`]
    pub async fn dump(&self) -> Result<JobStatus> {
        self.tracker.start();
        let result = self.dump_inner().await;
        self.finish(result)
    }

    /// Load a previously dumped output directory
    pub async fn load(&self) -> Result<JobStatus> {
        self.tracker.start();
        let result = self.load_inner().await;
        self.finish(result)
    }

    fn finish(&self, result: Result<()>) -> Result<JobStatus> {
        match result {
            Ok(()) => {
                self.tracker.succeed();
                Ok(self.tracker.status())
            }
            Err(e) => {
                self.tracker.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn source_storage(&self) -> Result<Arc<dyn StorageClient>> {
        let source = &self.config.source;
        Ok(self.registry.client_for(source.mode, source.remote.as_ref()).await?)
    }

    async fn target_storage(&self) -> Result<Arc<dyn StorageClient>> {
        let target = &self.config.target;
        Ok(self.registry.client_for(target.mode, target.remote.as_ref()).await?)
    }

    fn loader(&self) -> Loader {
        Loader::new(
            self.client.clone(),
            self.config.dumper.mode,
            self.config.target.output_dir.clone(),
        )
    }

    fn dumper(&self, source: Arc<dyn StorageClient>, target: Arc<dyn StorageClient>) -> Dumper {
        Dumper::new(self.config.clone(), source, target, self.tracker.clone())
    }

    async fn run_inner(&self) -> Result<()> {
        let target = self.target_storage().await?;
        let dumper = self.dumper(self.source_storage().await?, target.clone());
        let meta = dumper.resolve_meta().await?;
        self.loader().prepare_collections(&meta).await?;

        let cancel = self.cancel.child_token();
        let submitter = Submitter::start(self.client.clone(), self.tracker.clone(), &self.config.loader, cancel.clone());
        let dumped = dumper.dump(&meta, Some(&submitter)).await.map(|_| ());
        if dumped.is_err() {
            cancel.cancel();
        }
        settle(dumped, submitter.close().await)?;

        self.clean(target).await
    }

    async fn dump_inner(&self) -> Result<()> {
        let dumper = self.dumper(self.source_storage().await?, self.target_storage().await?);
        let meta = dumper.resolve_meta().await?;
        let groups = dumper.dump(&meta, None).await?;

        tracing::info!("✅ [MIGRATION] Dumped {} file groups, nothing to load", groups.len());
        self.tracker.set_dump_finished();
        self.tracker.set_load_finished();
        Ok(())
    }

    async fn load_inner(&self) -> Result<()> {
        let target = self.target_storage().await?;
        let loader = self.loader();
        let meta = loader
            .read_dumped_meta(target.clone(), self.config.meta.filter_collections.clone())
            .await?;
        loader.prepare_collections(&meta).await?;

        // The dump half of the progress is already done
        self.tracker.set_dump_total_rows(meta.rows as u64);
        self.tracker.add_dumped_rows(meta.rows as u64);

        let cancel = self.cancel.child_token();
        let submitter = Submitter::start(self.client.clone(), self.tracker.clone(), &self.config.loader, cancel.clone());
        let committed = loader.load(&meta, &submitter).await.map(|_| ());
        if committed.is_err() {
            cancel.cancel();
        }
        settle(committed, submitter.close().await)?;

        self.clean(target).await
    }

    async fn clean(&self, target: Arc<dyn StorageClient>) -> Result<()> {
        if self.config.loader.clean_after_load {
            Cleaner::new(target, self.config.target.output_dir.clone()).clean().await?;
        }
        Ok(())
    }
}

/// Combine the producer result with the submitter's; a producer that was
/// only cancelled because the submitter failed reports the submitter error
fn settle(produced: Result<()>, submitted: Result<()>) -> Result<()> {
    match (produced, submitted) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(MigrationError::Cancelled), Err(e)) => Err(e),
        (Err(e), _) => Err(e),
        (Ok(()), Err(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_prefers_root_cause() {
        let bulk = || MigrationError::BulkLoadFailed {
            task_id: "9".to_string(),
            reason: "bad".to_string(),
        };
        assert!(matches!(
            settle(Err(MigrationError::Cancelled), Err(bulk())),
            Err(MigrationError::BulkLoadFailed { .. })
        ));
        assert!(matches!(
            settle(Err(MigrationError::DecodeFormat("x".to_string())), Err(MigrationError::Cancelled)),
            Err(MigrationError::DecodeFormat(_))
        ));
        assert!(settle(Ok(()), Ok(())).is_ok());
    }
}
