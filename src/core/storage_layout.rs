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

//! Source and output path layout
//!
//! Legacy segment tables:
//! {tables}/{collection}/{segment}/{segment}.rv
//! {tables}/{collection}/{segment}/{segment}.uid
//! {tables}/{collection}/{segment}/deleted_docs
//!
//! Bulk-insert ready output:
//! {output}/tables/{collection}/{segment}/data.npy
//! {output}/tables/{collection}/{segment}/id.npy
//! {output}/{collection}/data.npy   (legacy index)
//! {output}/{collection}/id.npy     (legacy index)
//! {output}/meta.json

use crate::meta::SegmentInfo;

pub const DATA_FILE_NAME: &str = "data.npy";
pub const ID_FILE_NAME: &str = "id.npy";
pub const META_FILE_NAME: &str = "meta.json";
pub const DELETED_DOCS_FILE_NAME: &str = "deleted_docs";

/// Join object-key segments with a single `/`
pub fn join_key(parts: &[&str]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        let trimmed = if i == 0 {
            part.trim_end_matches('/')
        } else {
            part.trim_matches('/')
        };
        if trimmed.is_empty() {
            // Filesystem root
            if i == 0 && part.starts_with('/') {
                key.push('/');
            }
            continue;
        }
        if !key.is_empty() && !key.ends_with('/') {
            key.push('/');
        }
        key.push_str(trimmed);
    }
    key
}

fn segment_dir(tables_dir: &str, segment: &SegmentInfo) -> String {
    join_key(&[tables_dir, &segment.collection, &segment.segment])
}

pub fn source_vector_path(tables_dir: &str, segment: &SegmentInfo) -> String {
    join_key(&[&segment_dir(tables_dir, segment), &format!("{}.rv", segment.segment)])
}

pub fn source_id_path(tables_dir: &str, segment: &SegmentInfo) -> String {
    join_key(&[&segment_dir(tables_dir, segment), &format!("{}.uid", segment.segment)])
}

pub fn source_deleted_docs_path(tables_dir: &str, segment: &SegmentInfo) -> String {
    join_key(&[&segment_dir(tables_dir, segment), DELETED_DOCS_FILE_NAME])
}

pub fn output_segment_dir(output_dir: &str, segment: &SegmentInfo) -> String {
    join_key(&[output_dir, "tables", &segment.collection, &segment.segment])
}

pub fn output_vector_path(output_dir: &str, segment: &SegmentInfo) -> String {
    join_key(&[&output_segment_dir(output_dir, segment), DATA_FILE_NAME])
}

pub fn output_id_path(output_dir: &str, segment: &SegmentInfo) -> String {
    join_key(&[&output_segment_dir(output_dir, segment), ID_FILE_NAME])
}

pub fn output_index_vector_path(output_dir: &str, collection: &str) -> String {
    join_key(&[output_dir, collection, DATA_FILE_NAME])
}

pub fn output_index_id_path(output_dir: &str, collection: &str) -> String {
    join_key(&[output_dir, collection, ID_FILE_NAME])
}

pub fn output_meta_path(output_dir: &str) -> String {
    join_key(&[output_dir, META_FILE_NAME])
}
