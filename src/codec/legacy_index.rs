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

//! Legacy ANN index blob decoder (flat and IVF-flat layouts)
//!
//! ```text
//! flat:  tag(IxFI|IxF2|IxFl) dim:u32 ntotal:u64 reserved:16 trained:u8 metric:u32
//!        [cluster region]
//! ivf:   tag(IwFl) <flat fields> nlist:u64 nprobe:u64
//!        <quantizer: flat header, code_size:u64, code_size*4 bytes>
//!        direct_map{type:u8 = 0, size:u64 = 0}
//!        "ilar" nlist:u64 list_size:u64 ("full"|"sprs") n:u64 n*u64
//!        [cluster region]
//! cluster region, per cluster of `count` objects:
//!        count*dim float32 vectors, then count int64 ids
//! ```
//!
//! Vectors and ids are interleaved per cluster, so each output column needs
//! its own pass over the blob. The whole header is parsed before anything is
//! written; an unsupported layout produces no output.

use tokio::io::{AsyncRead, AsyncWrite};

use super::binary;
use super::numpy;
use crate::core::error::{MigrationError, Result};
use crate::core::types::{ArrayHeader, ElementType};

const FLAT_TAGS: [&[u8; 4]; 3] = [b"IxFI", b"IxF2", b"IxFl"];
const IVF_TAG: &[u8; 4] = b"IwFl";
const INVERTED_LISTS_TAG: &[u8; 4] = b"ilar";
const FULL_CLUSTERS_TAG: &[u8; 4] = b"full";
const SPARSE_CLUSTERS_TAG: &[u8; 4] = b"sprs";

const FLOAT32_BYTES: u64 = 4;
const INT64_BYTES: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Flat,
    Ivf,
}

/// Which column a decode pass emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPass {
    Ids,
    Vectors,
}

/// Per-cluster object counts, in file order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterPlan(Vec<u64>);

impl ClusterPlan {
    pub fn new(counts: Vec<u64>) -> Self {
        Self(counts)
    }

    /// Contiguous sizes
    pub fn from_full(values: Vec<u64>) -> Self {
        Self(values)
    }

    /// (index, size) pairs; every second element starting at 1 is a size
    pub fn from_sparse(values: Vec<u64>) -> Self {
        Self(values.into_iter().skip(1).step_by(2).collect())
    }

    pub fn counts(&self) -> &[u64] {
        &self.0
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyIndexHeader {
    pub kind: IndexKind,
    pub dim: usize,
    pub ntotal: u64,
    pub metric_type: u32,
    pub clusters: ClusterPlan,
}

impl LegacyIndexHeader {
    /// Output array shape for one pass
    pub fn array_header(&self, pass: IndexPass) -> Result<ArrayHeader> {
        let rows = usize::try_from(self.ntotal)
            .map_err(|_| MigrationError::DecodeFormat(format!("ntotal {} too large", self.ntotal)))?;
        Ok(match pass {
            IndexPass::Ids => ArrayHeader::new(rows, 0, ElementType::Int64),
            IndexPass::Vectors => ArrayHeader::new(rows, self.dim, ElementType::Float32),
        })
    }
}

struct FlatFields {
    dim: usize,
    ntotal: u64,
    metric_type: u32,
}

fn tag_name(tag: &[u8; 4]) -> String {
    String::from_utf8_lossy(tag).into_owned()
}

fn unsupported(what: &str, tag: &[u8; 4]) -> MigrationError {
    MigrationError::DecodeFormat(format!("unsupported {} tag '{}'", what, tag_name(tag)))
}

async fn read_flat_fields<R>(reader: &mut R) -> Result<FlatFields>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let dim = binary::read_u32(reader, "index dim").await? as usize;
    let ntotal = binary::read_u64(reader, "index ntotal").await?;
    binary::skip_bytes(reader, 16, "index reserved fields").await?;
    binary::read_u8(reader, "index trained flag").await?;
    let metric_type = binary::read_u32(reader, "index metric type").await?;

    Ok(FlatFields {
        dim,
        ntotal,
        metric_type,
    })
}

/// The coarse quantizer of an IVF index; only flat quantizers are supported
async fn skip_quantizer<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let tag = binary::read_tag(reader, "quantizer tag").await?;
    if !FLAT_TAGS.contains(&&tag) {
        return Err(unsupported("quantizer", &tag));
    }
    read_flat_fields(reader).await?;

    let code_size = binary::read_u64(reader, "quantizer code size").await?;
    let code_bytes = code_size.checked_mul(FLOAT32_BYTES).ok_or_else(|| {
        MigrationError::DecodeFormat(format!("quantizer code size {} overflows", code_size))
    })?;
    binary::skip_bytes(reader, code_bytes, "quantizer codes").await
}

async fn check_direct_map<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let dm_type = binary::read_u8(reader, "direct map type").await?;
    if dm_type != 0 {
        return Err(MigrationError::DecodeFormat(format!(
            "direct map type must be 0, found {}",
            dm_type
        )));
    }
    let dm_size = binary::read_u64(reader, "direct map size").await?;
    if dm_size != 0 {
        return Err(MigrationError::DecodeFormat(format!(
            "direct map size must be 0, found {}",
            dm_size
        )));
    }
    Ok(())
}

async fn read_cluster_plan<R>(reader: &mut R) -> Result<ClusterPlan>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let tag = binary::read_tag(reader, "inverted lists tag").await?;
    if &tag != INVERTED_LISTS_TAG {
        return Err(unsupported("inverted lists", &tag));
    }
    let nlist = binary::read_u64(reader, "inverted lists nlist").await?;
    let list_size = binary::read_u64(reader, "inverted lists code size").await?;
    tracing::debug!("🔎 [INDEX] Inverted lists nlist={} list_size={}", nlist, list_size);

    let cluster_tag = binary::read_tag(reader, "cluster array tag").await?;
    let sparse = match &cluster_tag {
        t if t == FULL_CLUSTERS_TAG => false,
        t if t == SPARSE_CLUSTERS_TAG => true,
        _ => return Err(unsupported("cluster array", &cluster_tag)),
    };

    let n = binary::read_len(reader, "cluster array length").await?;
    let mut values = Vec::with_capacity(n.min(1 << 20));
    for _ in 0..n {
        values.push(binary::read_u64(reader, "cluster size").await?);
    }

    let plan = if sparse {
        ClusterPlan::from_sparse(values)
    } else {
        ClusterPlan::from_full(values)
    };
    if plan.is_empty() {
        return Err(MigrationError::DecodeFormat(
            "cluster array is empty, index holds no data".to_string(),
        ));
    }
    Ok(plan)
}

/// Parse everything up to the cluster region
pub async fn read_index_header<R>(reader: &mut R) -> Result<LegacyIndexHeader>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let tag = binary::read_tag(reader, "index tag").await?;
    tracing::debug!("🔎 [INDEX] Header tag {}", tag_name(&tag));

    let (kind, fields, clusters) = if FLAT_TAGS.contains(&&tag) {
        let fields = read_flat_fields(reader).await?;
        // A flat index stores every object in a single cluster
        let clusters = ClusterPlan::new(vec![fields.ntotal]);
        (IndexKind::Flat, fields, clusters)
    } else if &tag == IVF_TAG {
        let fields = read_flat_fields(reader).await?;
        let nlist = binary::read_u64(reader, "ivf nlist").await?;
        let nprobe = binary::read_u64(reader, "ivf nprobe").await?;
        tracing::debug!("🔎 [INDEX] IVF nlist={} nprobe={}", nlist, nprobe);

        skip_quantizer(reader).await?;
        check_direct_map(reader).await?;
        let clusters = read_cluster_plan(reader).await?;
        (IndexKind::Ivf, fields, clusters)
    } else {
        return Err(unsupported("index", &tag));
    };

    if fields.dim == 0 {
        return Err(MigrationError::DecodeFormat("index dim is zero".to_string()));
    }
    if clusters.total() != fields.ntotal {
        return Err(MigrationError::DecodeFormat(format!(
            "cluster sizes sum to {} but index declares ntotal {}",
            clusters.total(),
            fields.ntotal
        )));
    }

    Ok(LegacyIndexHeader {
        kind,
        dim: fields.dim,
        ntotal: fields.ntotal,
        metric_type: fields.metric_type,
        clusters,
    })
}

/// Walk the cluster region emitting one column as numpy
///
/// The blob must hold the `expected` layout.
pub async fn publish_index_pass<R, W>(
    reader: &mut R,
    writer: &mut W,
    expected: IndexKind,
    pass: IndexPass,
    file_name: &str,
) -> Result<ArrayHeader>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let index = read_index_header(reader).await?;
    if index.kind != expected {
        return Err(MigrationError::DecodeFormat(format!(
            "expected a {:?} index in {}, found {:?}",
            expected, file_name, index.kind
        )));
    }
    let header = index.array_header(pass)?;

    numpy::write_header(writer, &header).await?;
    tracing::info!(
        "📝 [INDEX] Publish head finish: {} ({:?} pass, {} rows, dim {})",
        file_name,
        pass,
        header.row_count,
        index.dim
    );

    let vector_row_bytes = index.dim as u64 * FLOAT32_BYTES;
    for &count in index.clusters.counts() {
        let rows = usize::try_from(count)
            .map_err(|_| MigrationError::DecodeFormat(format!("cluster size {} too large", count)))?;
        let overflow =
            || MigrationError::DecodeFormat(format!("cluster size {} overflows byte count", count));
        match pass {
            IndexPass::Ids => {
                let vector_bytes = count.checked_mul(vector_row_bytes).ok_or_else(overflow)?;
                binary::skip_bytes(reader, vector_bytes, "cluster vectors").await?;
                binary::copy_records(reader, writer, &header, rows).await?;
            }
            IndexPass::Vectors => {
                let id_bytes = count.checked_mul(INT64_BYTES).ok_or_else(overflow)?;
                binary::copy_records(reader, writer, &header, rows).await?;
                binary::skip_bytes(reader, id_bytes, "cluster ids").await?;
            }
        }
    }

    tracing::info!("✅ [INDEX] Publish body finish: {} ({:?} pass)", file_name, pass);
    Ok(header)
}
