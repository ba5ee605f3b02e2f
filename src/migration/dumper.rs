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

//! Dump phase: legacy sources to numpy files in the output directory

use std::sync::Arc;
use tokio::io::BufReader;

use crate::codec::legacy_index::{self, IndexPass, LegacyIndexHeader};
use crate::core::config::{DumpMode, MigrationConfig};
use crate::core::error::{MigrationError, Result};
use crate::core::storage_layout;
use crate::meta::{self, CollectionMeta, JsonMetaProvider, MetaJson, MetadataProvider, SegmentInfo};
use crate::pipeline::{DecoderKind, ObjectSink, SourceDecoder, WorkReport, Worker};
use crate::storage::StorageClient;
use crate::task::{FileGroup, JobTracker, Submitter};

/// Legacy metric codes
const LEGACY_METRIC_L2: i32 = 1;
const LEGACY_METRIC_IP: i32 = 2;

pub struct Dumper {
    config: MigrationConfig,
    source: Arc<dyn StorageClient>,
    target: Arc<dyn StorageClient>,
    tracker: Arc<JobTracker>,
}

impl Dumper {
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn StorageClient>,
        target: Arc<dyn StorageClient>,
        tracker: Arc<JobTracker>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            tracker,
        }
    }

    fn output_dir(&self) -> &str {
        &self.config.target.output_dir
    }

    /// Collections and segments this run migrates
    pub async fn resolve_meta(&self) -> Result<MetaJson> {
        match self.config.dumper.mode {
            DumpMode::Segment => {
                let meta_file = self
                    .config
                    .meta
                    .meta_file
                    .as_deref()
                    .ok_or_else(|| MigrationError::Metadata("meta.meta_file is not set".to_string()))?;
                JsonMetaProvider::new(self.source.clone(), meta_file)
                    .with_filter(self.config.meta.filter_collections.clone())
                    .read_meta()
                    .await
            }
            DumpMode::LegacyIndex => {
                let header = self.read_index_header().await?;
                self.index_meta(&header)
            }
        }
    }

    async fn read_index_header(&self) -> Result<LegacyIndexHeader> {
        let index_file = self.index_file()?;
        let reader = self.source.get_object(index_file).await?;
        let mut reader = BufReader::with_capacity(self.config.dumper.reader_buffer_bytes(), reader);
        legacy_index::read_index_header(&mut reader).await
    }

    fn index_file(&self) -> Result<&str> {
        self.config
            .source
            .index_file
            .as_deref()
            .ok_or_else(|| MigrationError::Metadata("source.index_file is not set".to_string()))
    }

    fn index_collection(&self) -> Result<&str> {
        self.config
            .meta
            .collection
            .as_deref()
            .ok_or_else(|| MigrationError::Metadata("meta.collection is not set".to_string()))
    }

    fn index_meta(&self, header: &LegacyIndexHeader) -> Result<MetaJson> {
        let collection = self.index_collection()?.to_string();
        if let Some(dim) = self.config.meta.dim {
            if dim != header.dim {
                return Err(MigrationError::Validation(format!(
                    "configured dim {} does not match index dim {}",
                    dim, header.dim
                )));
            }
        }

        let metric = match self.config.meta.metric {
            Some(metric) => metric,
            // The index stores 0 for inner product and 1 for L2
            None => match header.metric_type {
                0 => LEGACY_METRIC_IP,
                1 => LEGACY_METRIC_L2,
                other => {
                    return Err(MigrationError::Metadata(format!(
                        "unsupported index metric type {}",
                        other
                    )))
                }
            },
        };

        let rows = header.array_header(IndexPass::Ids)?.row_count;
        Ok(MetaJson {
            collections: vec![CollectionMeta {
                collection,
                metric,
                rows,
                dim: header.dim,
                segments: Vec::new(),
            }],
            rows,
        })
    }

    /// Dump every source described by `meta`, committing each finished file
    /// group when a submitter is given
    pub async fn dump(&self, meta: &MetaJson, submitter: Option<&Submitter>) -> Result<Vec<FileGroup>> {
        self.tracker.set_dump_total_rows(meta.rows as u64);
        // Written first so the load phase can run alone
        meta::write_meta(self.target.as_ref(), self.output_dir(), meta).await?;

        match self.config.dumper.mode {
            DumpMode::Segment => self.dump_segments(meta, submitter).await,
            DumpMode::LegacyIndex => {
                let collection = meta
                    .collections
                    .first()
                    .ok_or_else(|| MigrationError::Metadata("no collection to dump".to_string()))?;
                let group = self.dump_legacy_index(collection, submitter).await?;
                Ok(vec![group])
            }
        }
    }

    async fn dump_segments(&self, meta: &MetaJson, submitter: Option<&Submitter>) -> Result<Vec<FileGroup>> {
        let tables_dir = self
            .config
            .source
            .tables_dir
            .as_deref()
            .ok_or_else(|| MigrationError::Metadata("source.tables_dir is not set".to_string()))?;
        let segments = meta.all_segments();
        let work_limit = self.config.dumper.work_limit.max(1);
        tracing::info!(
            "🚀 [DUMPER] Dumping {} segments in rounds of {}",
            segments.len(),
            work_limit
        );

        let mut groups = Vec::with_capacity(segments.len());
        for (round, batch) in segments.chunks(work_limit).enumerate() {
            tracing::debug!("🔄 [DUMPER] Round {} with {} segments", round, batch.len());
            let finished = futures::future::try_join_all(
                batch
                    .iter()
                    .map(|segment| self.dump_segment(tables_dir, segment, submitter)),
            )
            .await?;
            groups.extend(finished);
        }

        tracing::info!("✅ [DUMPER] Dumped {} segments", groups.len());
        Ok(groups)
    }

    async fn dump_segment(
        &self,
        tables_dir: &str,
        segment: &SegmentInfo,
        submitter: Option<&Submitter>,
    ) -> Result<FileGroup> {
        let output_dir = self.output_dir();
        let buffer = self.config.dumper.reader_buffer_bytes();
        let deleted_docs = storage_layout::source_deleted_docs_path(tables_dir, segment);
        let vector_path = storage_layout::output_vector_path(output_dir, segment);
        let id_path = storage_layout::output_id_path(output_dir, segment);

        let vector_decoder = SourceDecoder::new(
            DecoderKind::SegmentVector { dim: segment.dim },
            self.source.clone(),
            storage_layout::source_vector_path(tables_dir, segment),
            buffer,
        )
        .with_delete_file(deleted_docs.clone());
        let id_decoder = SourceDecoder::new(
            DecoderKind::SegmentId,
            self.source.clone(),
            storage_layout::source_id_path(tables_dir, segment),
            buffer,
        )
        .with_delete_file(deleted_docs);

        let vectors = Worker::new(
            Box::new(vector_decoder),
            Box::new(ObjectSink::new(self.target.clone(), vector_path.clone())),
            &self.config.dumper,
        );
        let ids = Worker::new(
            Box::new(id_decoder),
            Box::new(ObjectSink::new(self.target.clone(), id_path.clone())),
            &self.config.dumper,
        );

        let (vectors, ids) = tokio::try_join!(vectors.work(), ids.work())?;
        check_same_rows(&segment.segment, &vectors, &ids)?;
        self.tracker.add_dumped_rows(vectors.header.row_count as u64);

        let group = FileGroup::new(
            storage_layout::output_segment_dir(output_dir, segment),
            segment.collection.clone(),
            vec![id_path, vector_path],
        );
        if let Some(submitter) = submitter {
            submitter.commit(group.clone()).await?;
        }
        Ok(group)
    }

    /// Run the id and vector passes over the same blob concurrently
    async fn dump_legacy_index(&self, collection: &CollectionMeta, submitter: Option<&Submitter>) -> Result<FileGroup> {
        let index_file = self.index_file()?;
        let header = self.read_index_header().await?;
        tracing::info!(
            "🚀 [DUMPER] Dumping {:?} index {} ({} vectors, dim {}) into {}",
            header.kind,
            index_file,
            header.ntotal,
            header.dim,
            collection.collection
        );

        let output_dir = self.output_dir();
        let buffer = self.config.dumper.reader_buffer_bytes();
        let vector_path = storage_layout::output_index_vector_path(output_dir, &collection.collection);
        let id_path = storage_layout::output_index_id_path(output_dir, &collection.collection);

        let worker = |pass: IndexPass, key: &str| {
            let decoder = SourceDecoder::new(
                DecoderKind::for_index(header.kind, pass),
                self.source.clone(),
                index_file,
                buffer,
            );
            Worker::new(
                Box::new(decoder),
                Box::new(ObjectSink::new(self.target.clone(), key)),
                &self.config.dumper,
            )
        };

        let (ids, vectors) = tokio::try_join!(
            worker(IndexPass::Ids, &id_path).work(),
            worker(IndexPass::Vectors, &vector_path).work()
        )?;
        check_same_rows(index_file, &vectors, &ids)?;
        self.tracker.add_dumped_rows(vectors.header.row_count as u64);

        let group = FileGroup::new(
            storage_layout::join_key(&[output_dir, &collection.collection]),
            collection.collection.clone(),
            vec![id_path, vector_path],
        );
        if let Some(submitter) = submitter {
            submitter.commit(group.clone()).await?;
        }
        Ok(group)
    }
}

fn check_same_rows(source: &str, vectors: &WorkReport, ids: &WorkReport) -> Result<()> {
    let (vector_rows, id_rows) = (vectors.header.emitted_rows(), ids.header.emitted_rows());
    if vector_rows != id_rows {
        return Err(MigrationError::Validation(format!(
            "{} produced {} vectors but {} ids",
            source, vector_rows, id_rows
        )));
    }
    Ok(())
}
