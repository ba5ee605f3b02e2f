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

//! Throttled bulk-insert submission
//!
//! Ready file groups flow through two channels:
//!
//! ```text
//! commit() ─▶ data channel ─▶ submit loop ─▶ check channel ─▶ check loop
//! ```
//!
//! The submit loop waits while `watermark` jobs are in flight, submits one
//! job per file group and hands its task id to the check loop, which polls
//! each job to a terminal state.
//!
//! Shutdown is a two-phase handshake. [`Submitter::close`] drops the data
//! sender; the submit loop drains what is left and then drops the check
//! sender, which it owns exclusively; the check loop drains every outstanding
//! job and only then returns. Either loop failing cancels the other.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::tracker::JobTracker;
use crate::core::config::LoaderConfig;
use crate::core::error::{MigrationError, Result};
use crate::core::types::{CollectionName, TaskId};
use crate::dbclient::{BulkInsertClient, BulkInsertState};

/// Column files that are ingested together as one bulk-insert job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    /// Stable label used for progress tracking
    pub name: String,
    pub collection: CollectionName,
    pub files: Vec<String>,
}

impl FileGroup {
    pub fn new(name: impl Into<String>, collection: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            files,
        }
    }
}

#[derive(Debug)]
struct SubmittedTask {
    group: FileGroup,
    task_id: TaskId,
}

#[derive(Debug, Clone)]
struct Throttle {
    watermark: usize,
    backlog_poll_interval: Duration,
    state_poll_interval: Duration,
    backlog_deadline: Option<Duration>,
    job_deadline: Option<Duration>,
}

impl From<&LoaderConfig> for Throttle {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            watermark: config.watermark.max(1),
            backlog_poll_interval: config.backlog_poll_interval(),
            state_poll_interval: config.state_poll_interval(),
            backlog_deadline: config.backlog_deadline(),
            job_deadline: config.job_deadline(),
        }
    }
}

pub struct Submitter {
    data_tx: Option<mpsc::Sender<FileGroup>>,
    submit_loop: JoinHandle<Result<()>>,
    check_loop: JoinHandle<Result<()>>,
    tracker: Arc<JobTracker>,
    in_flight: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl Submitter {
    /// Spawn the submit and check loops
    ///
    /// `cancel` is the upstream cancellation signal; the loops also cancel
    /// it themselves on failure.
    pub fn start(
        client: Arc<dyn BulkInsertClient>,
        tracker: Arc<JobTracker>,
        config: &LoaderConfig,
        cancel: CancellationToken,
    ) -> Self {
        let throttle = Throttle::from(config);
        let (data_tx, data_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (check_tx, check_rx) = mpsc::channel(config.channel_capacity.max(1));
        let in_flight = Arc::new(AtomicUsize::new(0));

        tracing::info!(
            "🚀 [SUBMITTER] Starting with watermark={} channel_capacity={}",
            throttle.watermark,
            config.channel_capacity
        );

        let submit_loop = tokio::spawn(cancel_on_error(
            submit_loop(
                data_rx,
                check_tx,
                client.clone(),
                tracker.clone(),
                in_flight.clone(),
                throttle.clone(),
                cancel.clone(),
            ),
            cancel.clone(),
        ));
        let check_loop = tokio::spawn(cancel_on_error(
            check_loop(check_rx, client, tracker.clone(), in_flight.clone(), throttle, cancel.clone()),
            cancel.clone(),
        ));

        Self {
            data_tx: Some(data_tx),
            submit_loop,
            check_loop,
            tracker,
            in_flight,
            cancel,
        }
    }

    /// Queue a ready file group; waits while the data channel is full
    pub async fn commit(&self, group: FileGroup) -> Result<()> {
        let data_tx = self
            .data_tx
            .as_ref()
            .ok_or_else(|| MigrationError::Internal("commit after the submitter was closed".to_string()))?;

        if self.cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        // Registered before the send so the check loop never finishes an
        // unknown task; rolled back when the send does not happen
        let (collection, name) = (group.collection.clone(), group.name.clone());
        self.tracker.add_file_task(&collection, &name);

        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MigrationError::Cancelled),
            sent = data_tx.send(group) => sent.map_err(|_| MigrationError::Cancelled),
        };
        match sent {
            Ok(()) => {
                tracing::debug!("📥 [SUBMITTER] Committed {} for {}", name, collection);
                Ok(())
            }
            Err(e) => {
                self.tracker.remove_file_task(&collection, &name);
                Err(e)
            }
        }
    }

    /// Jobs submitted and not yet completed
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Signal that no more file groups will be committed and wait for every
    /// submitted job to reach a terminal state
    pub async fn close(mut self) -> Result<()> {
        // Phase one: the submit loop drains the data channel and then drops
        // the check sender
        self.data_tx = None;
        self.tracker.set_dump_finished();

        let submitted = join_loop(self.submit_loop, "submit").await;
        // Phase two: the check loop drains every outstanding job
        let checked = join_loop(self.check_loop, "check").await;

        // The first real failure wins over the cancellation it caused
        match (submitted, checked) {
            (Ok(()), Ok(())) => {
                tracing::info!("✅ [SUBMITTER] All bulk insert jobs finished");
                Ok(())
            }
            (Err(MigrationError::Cancelled), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => Err(e),
        }
    }
}

async fn cancel_on_error(work: impl std::future::Future<Output = Result<()>>, cancel: CancellationToken) -> Result<()> {
    let result = work.await;
    if let Err(e) = &result {
        if !matches!(e, MigrationError::Cancelled) {
            tracing::error!("❌ [SUBMITTER] {}", e);
        }
        cancel.cancel();
    }
    result
}

async fn join_loop(handle: JoinHandle<Result<()>>, name: &str) -> Result<()> {
    handle
        .await
        .map_err(|e| MigrationError::Internal(format!("{} loop panicked: {}", name, e)))?
}

async fn submit_loop(
    mut data_rx: mpsc::Receiver<FileGroup>,
    check_tx: mpsc::Sender<SubmittedTask>,
    client: Arc<dyn BulkInsertClient>,
    tracker: Arc<JobTracker>,
    in_flight: Arc<AtomicUsize>,
    throttle: Throttle,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let group = tokio::select! {
            _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
            next = data_rx.recv() => match next {
                Some(group) => group,
                None => break,
            },
        };

        wait_for_backlog(&in_flight, &throttle, &cancel).await?;

        let task_id = client.submit_bulk_insert(&group.collection, &group.files).await?;
        let count = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            "📤 [SUBMITTER] Submitted {} as task {} ({} in flight)",
            group.name,
            task_id,
            count
        );

        check_tx
            .send(SubmittedTask { group, task_id })
            .await
            .map_err(|_| MigrationError::Cancelled)?;
    }

    tracing::info!(
        "🔒 [SUBMITTER] Data channel drained for job {}, closing check channel",
        tracker.job_id()
    );
    drop(check_tx);
    Ok(())
}

/// Block while the target already has `watermark` jobs in flight
async fn wait_for_backlog(in_flight: &AtomicUsize, throttle: &Throttle, cancel: &CancellationToken) -> Result<()> {
    let started = Instant::now();
    loop {
        let count = in_flight.load(Ordering::SeqCst);
        if count < throttle.watermark {
            return Ok(());
        }
        if let Some(deadline) = throttle.backlog_deadline {
            if started.elapsed() >= deadline {
                return Err(MigrationError::Timeout {
                    what: format!("bulk insert backlog below {}", throttle.watermark),
                    after: deadline,
                });
            }
        }

        tracing::debug!("⏳ [SUBMITTER] {} jobs in flight, waiting for backlog", count);
        tokio::select! {
            _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
            _ = tokio::time::sleep(throttle.backlog_poll_interval) => {}
        }
    }
}

async fn check_loop(
    mut check_rx: mpsc::Receiver<SubmittedTask>,
    client: Arc<dyn BulkInsertClient>,
    tracker: Arc<JobTracker>,
    in_flight: Arc<AtomicUsize>,
    throttle: Throttle,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let submitted = tokio::select! {
            _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
            next = check_rx.recv() => match next {
                Some(submitted) => submitted,
                None => break,
            },
        };

        wait_until_terminal(client.as_ref(), &submitted.task_id, &throttle, &cancel).await?;

        let SubmittedTask { group, task_id } = submitted;
        tracker.finish_file_task(&group.collection, &group.name);
        let count = in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        tracing::info!(
            "✅ [SUBMITTER] Task {} for {} completed ({} in flight)",
            task_id,
            group.name,
            count
        );
    }

    tracker.set_load_finished();
    Ok(())
}

async fn wait_until_terminal(
    client: &dyn BulkInsertClient,
    task_id: &TaskId,
    throttle: &Throttle,
    cancel: &CancellationToken,
) -> Result<()> {
    let started = Instant::now();
    loop {
        match client.get_state(task_id).await? {
            BulkInsertState::Completed => return Ok(()),
            BulkInsertState::Failed(reason) | BulkInsertState::FailedAndCleaned(reason) => {
                return Err(MigrationError::BulkLoadFailed {
                    task_id: task_id.clone(),
                    reason,
                });
            }
            BulkInsertState::InProgress(progress) => {
                tracing::debug!("⏳ [SUBMITTER] Task {} in progress ({}%)", task_id, progress);
            }
        }

        if let Some(deadline) = throttle.job_deadline {
            if started.elapsed() >= deadline {
                return Err(MigrationError::Timeout {
                    what: format!("bulk insert task {}", task_id),
                    after: deadline,
                });
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
            _ = tokio::time::sleep(throttle.state_poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbclient::CollectionSpec;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Jobs complete in submission order once the test releases them
    #[derive(Default)]
    struct FakeClient {
        submitted: AtomicUsize,
        released: AtomicUsize,
        completed: Mutex<HashSet<TaskId>>,
        max_outstanding: AtomicUsize,
        fail_task: Option<usize>,
    }

    #[async_trait]
    impl BulkInsertClient for FakeClient {
        async fn ensure_collection(&self, _spec: &CollectionSpec) -> Result<()> {
            Ok(())
        }

        async fn submit_bulk_insert(&self, _collection: &str, _files: &[String]) -> Result<TaskId> {
            let index = self.submitted.fetch_add(1, Ordering::SeqCst);
            let outstanding = index + 1 - self.completed.lock().len();
            self.max_outstanding.fetch_max(outstanding, Ordering::SeqCst);
            Ok(index.to_string())
        }

        async fn get_state(&self, task_id: &TaskId) -> Result<BulkInsertState> {
            let index: usize = task_id.parse().unwrap();
            if self.fail_task == Some(index) {
                return Ok(BulkInsertState::FailedAndCleaned("corrupt file".to_string()));
            }
            if index < self.released.load(Ordering::SeqCst) {
                self.completed.lock().insert(task_id.clone());
                Ok(BulkInsertState::Completed)
            } else {
                Ok(BulkInsertState::InProgress(10))
            }
        }
    }

    fn fast_config() -> LoaderConfig {
        LoaderConfig {
            backlog_poll_interval_ms: 1,
            state_poll_interval_ms: 1,
            ..Default::default()
        }
    }

    fn group(i: usize) -> FileGroup {
        FileGroup::new(
            format!("seg-{}", i),
            "books",
            vec![format!("out/{}/id.npy", i), format!("out/{}/data.npy", i)],
        )
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_watermark_bounds_in_flight_jobs() {
        let client = Arc::new(FakeClient::default());
        let tracker = Arc::new(JobTracker::new(None));
        let submitter = Submitter::start(client.clone(), tracker.clone(), &fast_config(), CancellationToken::new());

        for i in 0..25 {
            submitter.commit(group(i)).await.unwrap();
        }

        wait_for(|| client.submitted.load(Ordering::SeqCst) == 20).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The 21st submission waits for a completion
        assert_eq!(client.submitted.load(Ordering::SeqCst), 20);
        assert_eq!(submitter.in_flight(), 20);

        client.released.store(1, Ordering::SeqCst);
        wait_for(|| client.submitted.load(Ordering::SeqCst) == 21).await;

        client.released.store(25, Ordering::SeqCst);
        submitter.close().await.unwrap();

        assert_eq!(client.submitted.load(Ordering::SeqCst), 25);
        assert!(client.max_outstanding.load(Ordering::SeqCst) <= 20);

        let status = tracker.status();
        assert_eq!(status.total_tasks, 25);
        assert_eq!(status.finished_tasks, 25);
        assert_eq!(status.percent_complete, 100);
        assert_eq!(tracker.sub_task("books").unwrap().finished_count, 25);
    }

    #[tokio::test]
    async fn test_failed_job_aborts_with_bulk_load_failed() {
        let client = Arc::new(FakeClient {
            released: AtomicUsize::new(usize::MAX),
            fail_task: Some(2),
            ..Default::default()
        });
        let tracker = Arc::new(JobTracker::new(None));
        let cancel = CancellationToken::new();
        let submitter = Submitter::start(client, tracker, &fast_config(), cancel.clone());

        for i in 0..5 {
            // Commits after the failure observe cancellation
            if submitter.commit(group(i)).await.is_err() {
                break;
            }
        }

        let err = tokio::time::timeout(Duration::from_secs(5), submitter.close())
            .await
            .expect("submitter must not hang")
            .unwrap_err();
        assert!(matches!(err, MigrationError::BulkLoadFailed { ref task_id, .. } if task_id == "2"));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_stuck_job_hits_deadline() {
        let client = Arc::new(FakeClient::default());
        let config = LoaderConfig {
            job_deadline_secs: Some(0),
            ..fast_config()
        };
        let submitter = Submitter::start(client, Arc::new(JobTracker::new(None)), &config, CancellationToken::new());
        submitter.commit(group(0)).await.unwrap();

        let err = submitter.close().await.unwrap_err();
        assert!(matches!(err, MigrationError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_upstream_cancel_stops_backlog_wait() {
        let client = Arc::new(FakeClient::default());
        let config = LoaderConfig {
            watermark: 1,
            ..fast_config()
        };
        let cancel = CancellationToken::new();
        let submitter = Submitter::start(client.clone(), Arc::new(JobTracker::new(None)), &config, cancel.clone());
        submitter.commit(group(0)).await.unwrap();
        submitter.commit(group(1)).await.unwrap();

        wait_for(|| client.submitted.load(Ordering::SeqCst) == 1).await;
        cancel.cancel();

        let err = tokio::time::timeout(Duration::from_secs(5), submitter.close())
            .await
            .expect("submitter must not hang")
            .unwrap_err();
        assert!(matches!(err, MigrationError::Cancelled));
    }

    #[tokio::test]
    async fn test_commit_after_cancel_is_not_counted() {
        let client = Arc::new(FakeClient::default());
        let tracker = Arc::new(JobTracker::new(None));
        let cancel = CancellationToken::new();
        let submitter = Submitter::start(client.clone(), tracker.clone(), &fast_config(), cancel.clone());
        submitter.commit(group(0)).await.unwrap();

        cancel.cancel();
        assert!(matches!(submitter.commit(group(1)).await, Err(MigrationError::Cancelled)));

        let status = tracker.status();
        assert_eq!(status.total_tasks, 1);
        assert_eq!(tracker.sub_task("books").unwrap().total, 1);
        assert!(submitter.close().await.is_err());
    }
}
