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

//! # Vecmigrate - Legacy Vector Collection Migration
//!
//! **stream, don't buffer**
//!
//! Vecmigrate moves vector collections out of legacy on-disk formats and into
//! a target vector database through its bulk-insert API.
//!
//! ## Key Features
//!
//! - **Legacy Decoders**: tombstone-aware segment files and flat/IVF index blobs
//! - **Numpy Output**: byte-exact `.npy` v1.0 envelopes ready for bulk insert
//! - **Streaming Pipeline**: decode and upload run concurrently through a bounded pipe
//! - **Throttled Loading**: bounded in-flight bulk-insert jobs polled to completion
//! - **Local and S3**: sources and targets on the local filesystem or S3-compatible stores

pub mod codec;
pub mod core;
pub mod dbclient;
pub mod meta;
pub mod migration;
pub mod pipeline;
pub mod storage;
pub mod task;

pub use crate::core::*;
pub use dbclient::{BulkInsertClient, BulkInsertState, CollectionSpec, HttpBulkInsertClient};
pub use migration::Migration;
pub use task::{JobState, JobStatus, JobTracker};
