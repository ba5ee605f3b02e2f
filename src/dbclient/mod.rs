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

//! Target vector database client

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::types::TaskId;
use crate::meta::MetricType;

pub use http::HttpBulkInsertClient;

/// State of one bulk-insert job as reported by the target database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkInsertState {
    Completed,
    Failed(String),
    FailedAndCleaned(String),
    /// Not an error: poll again later
    InProgress(i64),
}

/// Schema of a migrated collection: int64 primary key `id`, float vector `data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub dim: usize,
    pub metric: MetricType,
}

#[async_trait]
pub trait BulkInsertClient: Send + Sync {
    /// Create the collection unless it already exists
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()>;

    /// Start one bulk-insert job over column files of a single row group
    async fn submit_bulk_insert(&self, collection: &str, files: &[String]) -> Result<TaskId>;

    async fn get_state(&self, task_id: &TaskId) -> Result<BulkInsertState>;
}
