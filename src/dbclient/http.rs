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

//! RESTful v2 client for the target database's import and collection APIs

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::{BulkInsertClient, BulkInsertState, CollectionSpec};
use crate::core::config::DatabaseConfig;
use crate::core::error::{MigrationError, Result};
use crate::core::types::TaskId;

const IMPORT_CREATE_PATH: &str = "/v2/vectordb/jobs/import/create";
const IMPORT_PROGRESS_PATH: &str = "/v2/vectordb/jobs/import/get_progress";
const COLLECTION_HAS_PATH: &str = "/v2/vectordb/collections/has";
const COLLECTION_CREATE_PATH: &str = "/v2/vectordb/collections/create";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i32,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportCreated {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct ImportProgress {
    state: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    progress: i64,
}

#[derive(Debug, Deserialize)]
struct HasCollection {
    has: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCollectionRequest<'a> {
    collection_name: &'a str,
    dimension: usize,
    metric_type: &'a str,
    primary_field_name: &'a str,
    vector_field_name: &'a str,
    id_type: &'a str,
    auto_id: bool,
    description: &'a str,
}

pub struct HttpBulkInsertClient {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBulkInsertClient {
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        tracing::debug!(
            "🌐 Creating bulk-insert client for {} with timeout: {}s",
            config.endpoint,
            config.request_timeout_secs
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| MigrationError::BulkLoad(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.post_optional(path, body)
            .await?
            .ok_or_else(|| MigrationError::BulkLoad(format!("{} returned no data", path)))
    }

    async fn post_optional<B, T>(&self, path: &str, body: &B) -> Result<Option<T>>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let mut request = self.http_client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!("❌ [DBCLIENT] Request to {} failed: {}", url, e);
            MigrationError::BulkLoad(format!("request to {} failed: {}", url, e))
        })?;

        if !response.status().is_success() {
            tracing::error!("❌ [DBCLIENT] {} returned {}", url, response.status());
            return Err(MigrationError::BulkLoad(format!("{} returned {}", url, response.status())));
        }

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| MigrationError::BulkLoad(format!("invalid response from {}: {}", url, e)))?;

        if envelope.code != 0 {
            return Err(MigrationError::BulkLoad(format!(
                "{} failed with code {}: {}",
                path, envelope.code, envelope.message
            )));
        }
        Ok(envelope.data)
    }
}

/// Map a remote import state string
///
/// Only completion and the failure states end a job; anything else is
/// polled again, including states this client does not know by name.
pub(crate) fn parse_state(state: &str, reason: String, progress: i64) -> BulkInsertState {
    let name = match state {
        "Importing" => state,
        _ => state.strip_prefix("Import").unwrap_or(state),
    };
    match name {
        "Completed" => BulkInsertState::Completed,
        "Failed" => BulkInsertState::Failed(reason),
        "FailedAndCleaned" => BulkInsertState::FailedAndCleaned(reason),
        "Pending" | "Started" | "Preparing" | "Importing" | "Persisted" | "Flushed" | "IndexBuilding"
        | "Sorting" => BulkInsertState::InProgress(progress),
        _ => {
            tracing::warn!("⚠️ [DBCLIENT] Unknown import state {}, treating it as in progress", state);
            BulkInsertState::InProgress(progress)
        }
    }
}

#[async_trait]
impl BulkInsertClient for HttpBulkInsertClient {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        tracing::info!("🔍 [DBCLIENT] Checking collection {}", spec.name);
        let existing: HasCollection = self
            .post(COLLECTION_HAS_PATH, &json!({ "collectionName": spec.name }))
            .await?;
        if existing.has {
            tracing::warn!("⚠️ [DBCLIENT] Collection {} already exists, not creating it", spec.name);
            return Ok(());
        }

        let request = CreateCollectionRequest {
            collection_name: &spec.name,
            dimension: spec.dim,
            metric_type: spec.metric.as_str(),
            primary_field_name: "id",
            vector_field_name: "data",
            id_type: "Int64",
            auto_id: false,
            description: "Migrated by vecmigrate",
        };
        let _: Option<serde_json::Value> = self.post_optional(COLLECTION_CREATE_PATH, &request).await?;
        tracing::info!(
            "✅ [DBCLIENT] Created collection {} (dim={}, metric={})",
            spec.name,
            spec.dim,
            spec.metric
        );
        Ok(())
    }

    async fn submit_bulk_insert(&self, collection: &str, files: &[String]) -> Result<TaskId> {
        let body = json!({
            "collectionName": collection,
            "files": [files],
        });
        let created: ImportCreated = self.post(IMPORT_CREATE_PATH, &body).await?;
        tracing::info!(
            "📤 [DBCLIENT] Started bulk insert {} for {} with {:?}",
            created.job_id,
            collection,
            files
        );
        Ok(created.job_id)
    }

    async fn get_state(&self, task_id: &TaskId) -> Result<BulkInsertState> {
        let progress: ImportProgress = self
            .post(IMPORT_PROGRESS_PATH, &json!({ "jobId": task_id }))
            .await?;
        tracing::debug!(
            "🔍 [DBCLIENT] Bulk insert {} state={} progress={}",
            task_id,
            progress.state,
            progress.progress
        );
        Ok(parse_state(&progress.state, progress.reason, progress.progress))
    }
}
