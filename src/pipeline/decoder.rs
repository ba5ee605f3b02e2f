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

//! Producer side of a worker: decoders that publish a numpy stream

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncWrite, BufReader};

use crate::codec::legacy_index::{self, IndexKind, IndexPass};
use crate::codec::segment::{self, SegmentColumn};
use crate::codec::tombstone::DeleteOffsets;
use crate::core::error::{MigrationError, Result};
use crate::core::types::ArrayHeader;
use crate::storage::{ObjectReader, StorageClient};

/// Lifecycle: `before_publish` → `publish_to` → `after_publish`
///
/// The worker always calls `after_publish` once `before_publish` has run,
/// whatever `publish_to` returned.
#[async_trait]
pub trait Decoder: Send {
    /// Source name for logs
    fn name(&self) -> &str;

    /// Acquire sources
    async fn before_publish(&mut self) -> Result<()>;

    /// Write the full numpy stream
    async fn publish_to(&mut self, writer: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<ArrayHeader>;

    /// Release sources
    async fn after_publish(&mut self) -> Result<()>;
}

/// Supported source layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    SegmentVector { dim: usize },
    SegmentId,
    LegacyFlatIndex(IndexPass),
    LegacyIvfIndex(IndexPass),
}

impl DecoderKind {
    pub fn for_index(kind: IndexKind, pass: IndexPass) -> Self {
        match kind {
            IndexKind::Flat => DecoderKind::LegacyFlatIndex(pass),
            IndexKind::Ivf => DecoderKind::LegacyIvfIndex(pass),
        }
    }

    fn uses_tombstones(&self) -> bool {
        matches!(self, DecoderKind::SegmentVector { .. } | DecoderKind::SegmentId)
    }
}

/// Decoder reading its sources through a storage client
pub struct SourceDecoder {
    kind: DecoderKind,
    storage: Arc<dyn StorageClient>,
    source_key: String,
    delete_key: Option<String>,
    buffer_size: usize,
    source: Option<BufReader<ObjectReader>>,
    deletes: Option<BufReader<ObjectReader>>,
}

impl SourceDecoder {
    pub fn new(
        kind: DecoderKind,
        storage: Arc<dyn StorageClient>,
        source_key: impl Into<String>,
        buffer_size: usize,
    ) -> Self {
        Self {
            kind,
            storage,
            source_key: source_key.into(),
            delete_key: None,
            buffer_size,
            source: None,
            deletes: None,
        }
    }

    /// Companion `deleted_docs` file; a missing file means nothing was deleted
    pub fn with_delete_file(mut self, delete_key: impl Into<String>) -> Self {
        self.delete_key = Some(delete_key.into());
        self
    }
}

#[async_trait]
impl Decoder for SourceDecoder {
    fn name(&self) -> &str {
        &self.source_key
    }

    async fn before_publish(&mut self) -> Result<()> {
        let reader = self.storage.get_object(&self.source_key).await?;
        self.source = Some(BufReader::with_capacity(self.buffer_size, reader));

        if let (true, Some(delete_key)) = (self.kind.uses_tombstones(), &self.delete_key) {
            if self.storage.exists(delete_key).await? {
                let reader = self.storage.get_object(delete_key).await?;
                self.deletes = Some(BufReader::new(reader));
            } else {
                tracing::warn!(
                    "⚠️ [DECODER] No deleted_docs at {}, writing all rows of {}",
                    delete_key,
                    self.source_key
                );
            }
        }
        Ok(())
    }

    async fn publish_to(&mut self, writer: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<ArrayHeader> {
        let source = self.source.as_mut().ok_or_else(|| {
            MigrationError::Internal(format!("{} published before its source was opened", self.source_key))
        })?;

        match self.kind {
            DecoderKind::SegmentVector { dim } => {
                let mut deletes = open_deletes(self.deletes.take()).await?;
                segment::publish_segment(source, &mut deletes, SegmentColumn::Vector { dim }, writer, &self.source_key)
                    .await
            }
            DecoderKind::SegmentId => {
                let mut deletes = open_deletes(self.deletes.take()).await?;
                segment::publish_segment(source, &mut deletes, SegmentColumn::Id, writer, &self.source_key).await
            }
            DecoderKind::LegacyFlatIndex(pass) => {
                legacy_index::publish_index_pass(source, writer, IndexKind::Flat, pass, &self.source_key).await
            }
            DecoderKind::LegacyIvfIndex(pass) => {
                legacy_index::publish_index_pass(source, writer, IndexKind::Ivf, pass, &self.source_key).await
            }
        }
    }

    async fn after_publish(&mut self) -> Result<()> {
        self.source = None;
        self.deletes = None;
        Ok(())
    }
}

async fn open_deletes(
    reader: Option<BufReader<ObjectReader>>,
) -> Result<DeleteOffsets<BufReader<ObjectReader>>> {
    match reader {
        Some(reader) => DeleteOffsets::open(reader).await,
        None => Ok(DeleteOffsets::empty()),
    }
}
