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

//! Migration configuration, loaded from TOML

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::ConfigError;

const ONE_KB: usize = 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub dumper: DumperConfig,
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub meta: MetaConfig,
    pub loader: LoaderConfig,
    pub log: LogConfig,
}

/// Which legacy layout the dump phase reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpMode {
    /// Paired `.rv` / `.uid` segment files with a `deleted_docs` side file
    #[default]
    Segment,
    /// A single tagged ANN index blob (flat or IVF)
    LegacyIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumperConfig {
    pub mode: DumpMode,

    /// Number of files decoded concurrently in one round
    pub work_limit: usize,

    /// Read buffer in front of each source (KB)
    pub reader_buffer_kb: usize,

    /// Write buffer in front of the pipe (KB)
    pub writer_buffer_kb: usize,

    /// Bytes the pipe holds before the decoder blocks (KB)
    pub pipe_capacity_kb: usize,
}

impl Default for DumperConfig {
    fn default() -> Self {
        Self {
            mode: DumpMode::Segment,
            work_limit: 2,
            reader_buffer_kb: 1024,
            writer_buffer_kb: 4,
            pipe_capacity_kb: 4096,
        }
    }
}

impl DumperConfig {
    pub fn reader_buffer_bytes(&self) -> usize {
        self.reader_buffer_kb.max(1) * ONE_KB
    }

    pub fn writer_buffer_bytes(&self) -> usize {
        self.writer_buffer_kb.max(1) * ONE_KB
    }

    pub fn pipe_capacity_bytes(&self) -> usize {
        self.pipe_capacity_kb.max(1) * ONE_KB
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub mode: StorageMode,

    /// Root of the legacy `tables` directory (segment mode)
    pub tables_dir: Option<String>,

    /// Path of the legacy index blob (legacy index mode)
    pub index_file: Option<String>,

    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub mode: StorageMode,
    pub output_dir: String,
    pub remote: Option<RemoteConfig>,
    pub database: DatabaseConfig,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Local,
            output_dir: "./output".to_string(),
            remote: None,
            database: DatabaseConfig::default(),
        }
    }
}

/// Object storage connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Custom endpoint for S3-compatible stores, AWS when unset
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub use_ssl: bool,
    pub use_iam: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:19530".to_string(),
            token: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Location of `meta.json` (segment mode)
    pub meta_file: Option<String>,

    /// Target collection name (legacy index mode)
    pub collection: Option<String>,

    /// Vector dimension (legacy index mode)
    pub dim: Option<usize>,

    /// Legacy metric code for the legacy index collection (1 = L2, 2 = IP)
    pub metric: Option<i32>,

    /// Only migrate these collections; empty means all
    pub filter_collections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum bulk-insert jobs in flight at once
    pub watermark: usize,
    pub backlog_poll_interval_ms: u64,
    pub state_poll_interval_ms: u64,
    pub backlog_deadline_secs: Option<u64>,
    pub job_deadline_secs: Option<u64>,
    pub channel_capacity: usize,
    pub clean_after_load: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            watermark: 20,
            backlog_poll_interval_ms: 10_000,
            state_poll_interval_ms: 10_000,
            backlog_deadline_secs: None,
            job_deadline_secs: None,
            channel_capacity: 100,
            clean_after_load: false,
        }
    }
}

impl LoaderConfig {
    pub fn backlog_poll_interval(&self) -> Duration {
        Duration::from_millis(self.backlog_poll_interval_ms)
    }

    pub fn state_poll_interval(&self) -> Duration {
        Duration::from_millis(self.state_poll_interval_ms)
    }

    pub fn backlog_deadline(&self) -> Option<Duration> {
        self.backlog_deadline_secs.map(Duration::from_secs)
    }

    pub fn job_deadline(&self) -> Option<Duration> {
        self.job_deadline_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl MigrationConfig {
    /// Load and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MigrationConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dumper.work_limit == 0 {
            return Err(ConfigError::invalid("dumper.work_limit", 0));
        }
        if self.loader.watermark == 0 {
            return Err(ConfigError::invalid("loader.watermark", 0));
        }
        if self.loader.channel_capacity == 0 {
            return Err(ConfigError::invalid("loader.channel_capacity", 0));
        }
        if self.target.output_dir.trim().is_empty() {
            return Err(ConfigError::missing("target.output_dir"));
        }

        match self.dumper.mode {
            DumpMode::Segment => {
                if self.source.tables_dir.is_none() {
                    return Err(ConfigError::missing("source.tables_dir"));
                }
                if self.meta.meta_file.is_none() {
                    return Err(ConfigError::missing("meta.meta_file"));
                }
            }
            DumpMode::LegacyIndex => {
                if self.source.index_file.is_none() {
                    return Err(ConfigError::missing("source.index_file"));
                }
                if self.meta.collection.is_none() {
                    return Err(ConfigError::missing("meta.collection"));
                }
                match self.meta.dim {
                    None => return Err(ConfigError::missing("meta.dim")),
                    Some(0) => return Err(ConfigError::invalid("meta.dim", 0)),
                    Some(_) => {}
                }
            }
        }

        if self.source.mode == StorageMode::Remote && self.source.remote.is_none() {
            return Err(ConfigError::missing("source.remote"));
        }
        if self.target.mode == StorageMode::Remote && self.target.remote.is_none() {
            return Err(ConfigError::missing("target.remote"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_config_parses_with_defaults() {
        let config = MigrationConfig::from_toml_str(
            r#"
            [source]
            tables_dir = "/data/milvus/tables"

            [meta]
            meta_file = "/data/milvus/meta.json"

            [target]
            output_dir = "/tmp/out"
            "#,
        )
        .unwrap();

        assert_eq!(config.dumper.mode, DumpMode::Segment);
        assert_eq!(config.dumper.work_limit, 2);
        assert_eq!(config.loader.watermark, 20);
        assert_eq!(config.loader.state_poll_interval(), Duration::from_secs(10));
        assert_eq!(config.target.mode, StorageMode::Local);
    }

    #[test]
    fn test_legacy_index_requires_dim() {
        let err = MigrationConfig::from_toml_str(
            r#"
            [dumper]
            mode = "legacy_index"

            [source]
            index_file = "/data/index.bin"

            [meta]
            collection = "faiss_vectors"
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "meta.dim"));
    }

    #[test]
    fn test_remote_target_needs_remote_section() {
        let err = MigrationConfig::from_toml_str(
            r#"
            [source]
            tables_dir = "/data/tables"

            [meta]
            meta_file = "/data/meta.json"

            [target]
            mode = "remote"
            output_dir = "migration/"
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "target.remote"));
    }
}
