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

use std::time::Duration;
use thiserror::Error;

use crate::storage::filesystem::StorageError;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, MigrationError>;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Decode format error: {0}")]
    DecodeFormat(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Bulk insert task {task_id} failed: {reason}")]
    BulkLoadFailed { task_id: String, reason: String },

    #[error("Bulk insert client error: {0}")]
    BulkLoad(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Timed out waiting for {what} after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("Migration cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MigrationError {
    /// True when the error is the writer side noticing that the reader went away
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, MigrationError::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe)
    }

    /// Reading past the end of a source is a format problem, not a transport one
    pub(crate) fn from_read(err: std::io::Error, what: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            MigrationError::DecodeFormat(format!("unexpected end of file while reading {}", what))
        } else {
            MigrationError::Io(err)
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid(field: &str, value: impl ToString) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn missing(field: &str) -> Self {
        ConfigError::MissingField {
            field: field.to_string(),
        }
    }
}
