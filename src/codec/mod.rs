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

//! Binary codecs: legacy source formats in, numpy envelopes out

pub mod binary;
pub mod legacy_index;
pub mod numpy;
pub mod segment;
pub mod tombstone;

pub use legacy_index::{ClusterPlan, IndexKind, IndexPass, LegacyIndexHeader};
pub use segment::SegmentColumn;
pub use tombstone::DeleteOffsets;
