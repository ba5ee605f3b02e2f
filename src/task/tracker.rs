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

//! Per-job progress and status, owned by one migration run

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};

const ONE_PERCENT: u8 = 1;
const HALF_PERCENT: u8 = 50;
const HUNDRED_PERCENT: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Init,
    Running,
    Success,
    Fail,
}

/// File groups committed for one collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubFileTask {
    pub total: usize,
    pub finished_count: usize,
    pub outstanding: BTreeSet<String>,
    pub finished: BTreeSet<String>,
}

/// Status snapshot exposed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub status: JobState,
    pub percent_complete: u8,
    pub total_tasks: usize,
    pub finished_tasks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct JobTracker {
    job_id: String,
    started_at: DateTime<Utc>,
    state: Mutex<JobState>,
    message: Mutex<Option<String>>,

    total_tasks: AtomicUsize,
    finished_tasks: AtomicUsize,
    sub_tasks: Mutex<HashMap<String, SubFileTask>>,

    dump_total_rows: AtomicU64,
    dump_finished_rows: AtomicU64,
    dump_finished: AtomicBool,
    load_finished: AtomicBool,
    last_percent: AtomicU8,
}

impl JobTracker {
    /// A fresh job; a random id is generated when none is given
    pub fn new(job_id: Option<String>) -> Self {
        let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            job_id,
            started_at: Utc::now(),
            state: Mutex::new(JobState::Init),
            message: Mutex::new(None),
            total_tasks: AtomicUsize::new(0),
            finished_tasks: AtomicUsize::new(0),
            sub_tasks: Mutex::new(HashMap::new()),
            dump_total_rows: AtomicU64::new(0),
            dump_finished_rows: AtomicU64::new(0),
            dump_finished: AtomicBool::new(false),
            load_finished: AtomicBool::new(false),
            last_percent: AtomicU8::new(0),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    pub fn start(&self) {
        *self.state.lock() = JobState::Running;
        tracing::info!("🚀 [JOB] {} running", self.job_id);
    }

    pub fn succeed(&self) {
        let mut state = self.state.lock();
        if *state != JobState::Fail {
            *state = JobState::Success;
        }
        tracing::info!("✅ [JOB] {} finished, {}%", self.job_id, self.percent());
    }

    /// Mark the job failed; only the first message is kept
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        *self.state.lock() = JobState::Fail;
        let mut first = self.message.lock();
        if first.is_none() {
            tracing::error!("❌ [JOB] {} failed: {}", self.job_id, message);
            *first = Some(message);
        }
    }

    pub fn set_dump_total_rows(&self, rows: u64) {
        self.dump_total_rows.store(rows, Ordering::SeqCst);
    }

    pub fn add_dumped_rows(&self, rows: u64) {
        self.dump_finished_rows.fetch_add(rows, Ordering::SeqCst);
        tracing::info!("📊 [JOB] Progress {}%", self.percent());
    }

    pub fn set_dump_finished(&self) {
        self.dump_finished.store(true, Ordering::SeqCst);
    }

    pub fn set_load_finished(&self) {
        self.load_finished.store(true, Ordering::SeqCst);
        tracing::info!("📊 [JOB] Progress {}%", self.percent());
    }

    /// Register one committed file group of `collection`
    pub fn add_file_task(&self, collection: &str, file_name: &str) {
        let mut sub_tasks = self.sub_tasks.lock();
        let sub_task = sub_tasks.entry(collection.to_string()).or_default();
        sub_task.outstanding.insert(file_name.to_string());
        sub_task.total += 1;
        self.total_tasks.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo [`JobTracker::add_file_task`] for a group that was never handed over
    pub fn remove_file_task(&self, collection: &str, file_name: &str) {
        let mut sub_tasks = self.sub_tasks.lock();
        if let Some(sub_task) = sub_tasks.get_mut(collection) {
            if sub_task.outstanding.remove(file_name) {
                sub_task.total -= 1;
                self.total_tasks.fetch_sub(1, Ordering::SeqCst);
            }
            if sub_task.total == 0 {
                sub_tasks.remove(collection);
            }
        }
    }

    pub fn finish_file_task(&self, collection: &str, file_name: &str) {
        {
            let mut sub_tasks = self.sub_tasks.lock();
            let sub_task = sub_tasks.entry(collection.to_string()).or_default();
            sub_task.outstanding.remove(file_name);
            if sub_task.finished.insert(file_name.to_string()) {
                sub_task.finished_count += 1;
            }
        }
        self.finished_tasks.fetch_add(1, Ordering::SeqCst);
        tracing::info!("📊 [JOB] Progress {}%", self.percent());
    }

    pub fn sub_task(&self, collection: &str) -> Option<SubFileTask> {
        self.sub_tasks.lock().get(collection).cloned()
    }

    /// Completion percent; never goes backwards
    pub fn percent(&self) -> u8 {
        let current = self.compute_percent();
        let previous = self.last_percent.fetch_max(current, Ordering::SeqCst);
        previous.max(current)
    }

    fn compute_percent(&self) -> u8 {
        if self.load_finished.load(Ordering::SeqCst) {
            return HUNDRED_PERCENT;
        }

        if self.dump_finished.load(Ordering::SeqCst) {
            let total = self.total_tasks.load(Ordering::SeqCst) as u64;
            if total == 0 {
                return HALF_PERCENT;
            }
            let finished = (self.finished_tasks.load(Ordering::SeqCst) as u64).min(total);
            return HALF_PERCENT + (finished * HALF_PERCENT as u64 / total) as u8;
        }

        let total = self.dump_total_rows.load(Ordering::SeqCst);
        if total == 0 {
            return ONE_PERCENT;
        }
        let dumped = self.dump_finished_rows.load(Ordering::SeqCst);
        ((dumped.saturating_mul(HALF_PERCENT as u64) / total).min(HALF_PERCENT as u64)) as u8
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.job_id.clone(),
            status: self.state(),
            percent_complete: self.percent(),
            total_tasks: self.total_tasks.load(Ordering::SeqCst),
            finished_tasks: self.finished_tasks.load(Ordering::SeqCst),
            message: self.message.lock().clone(),
            started_at: self.started_at,
        }
    }
}
