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

//! Legacy segment column files (`.rv` vectors, `.uid` ids)
//!
//! Each file is an 8-byte LE byte length followed by fixed-size records.
//! Publishing rewrites the envelope as numpy and drops tombstoned rows.

use tokio::io::{AsyncRead, AsyncWrite};

use super::binary;
use super::numpy;
use super::tombstone::DeleteOffsets;
use crate::core::error::Result;
use crate::core::types::{ArrayHeader, ElementType};

/// Column stored by one segment file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentColumn {
    /// float32 rows of `dim` elements
    Vector { dim: usize },
    /// one int64 per row
    Id,
}

impl SegmentColumn {
    pub fn element_type(&self) -> ElementType {
        match self {
            SegmentColumn::Vector { .. } => ElementType::Float32,
            SegmentColumn::Id => ElementType::Int64,
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            SegmentColumn::Vector { dim } => *dim,
            SegmentColumn::Id => 0,
        }
    }
}

/// Read the byte-length prefix and derive the array shape
pub async fn read_segment_header<R>(reader: &mut R, column: SegmentColumn) -> Result<ArrayHeader>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let byte_length = binary::read_u64(reader, "segment byte length").await?;
    ArrayHeader::from_byte_length(byte_length, column.dim(), column.element_type())
}

/// Stream one segment column as numpy, skipping deleted rows
///
/// Returns the header that was written. Records are copied byte for byte;
/// running out of input before the declared row count is a decode error.
pub async fn publish_segment<R, D, W>(
    data: &mut R,
    deletes: &mut DeleteOffsets<D>,
    column: SegmentColumn,
    writer: &mut W,
    file_name: &str,
) -> Result<ArrayHeader>
where
    R: AsyncRead + Unpin + ?Sized,
    D: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let header = read_segment_header(data, column).await?;

    if deletes.is_empty() {
        tracing::debug!("⚡ [SEGMENT] No deleted rows, copying {} whole", file_name);
        numpy::write_header(writer, &header).await?;
        tracing::info!("📝 [SEGMENT] Publish head finish: {}", file_name);
        binary::copy_records(data, writer, &header, header.row_count).await?;
        tracing::info!("✅ [SEGMENT] Publish body finish: {} ({} rows)", file_name, header.row_count);
        return Ok(header);
    }

    let header = header.with_deleted_rows(deletes.count())?;
    numpy::write_header(writer, &header).await?;
    tracing::info!(
        "📝 [SEGMENT] Publish head finish: {} ({} of {} rows deleted)",
        file_name,
        header.deleted_row_offset,
        header.row_count
    );

    let row_bytes = header.row_bytes() as u64;
    let mut row = 0usize;
    while let Some(offset) = deletes.next_offset(header.row_count).await? {
        binary::copy_records(data, writer, &header, offset - row).await?;
        binary::skip_bytes(data, row_bytes, "deleted row").await?;
        row = offset + 1;
    }
    binary::copy_records(data, writer, &header, header.row_count - row).await?;

    tracing::info!(
        "✅ [SEGMENT] Publish body finish: {} ({} rows)",
        file_name,
        header.emitted_rows()
    );
    Ok(header)
}

#[cfg(test)]
pub(crate) fn encode_segment<T: Copy>(values: &[T], to_le: impl Fn(T) -> Vec<u8>) -> Vec<u8> {
    let payload: Vec<u8> = values.iter().flat_map(|v| to_le(*v)).collect();
    let mut out = (payload.len() as u64).to_le_bytes().to_vec();
    out.extend_from_slice(&payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::numpy::encode_header;
    use crate::codec::tombstone::encode_offsets;
    use crate::core::error::MigrationError;

    fn ids(values: &[i64]) -> Vec<u8> {
        encode_segment(values, |v| v.to_le_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_fast_path_copies_payload_unchanged() {
        let source = ids(&[10, 11, 12, 13, 14]);
        let marker = encode_offsets(&[]);
        let mut deletes = DeleteOffsets::open(&marker[..]).await.unwrap();

        let mut out = Vec::new();
        let header = publish_segment(&mut &source[..], &mut deletes, SegmentColumn::Id, &mut out, "s.uid")
            .await
            .unwrap();

        assert_eq!(header.row_count, 5);
        assert_eq!(header.emitted_rows(), 5);
        let preamble = encode_header(&header).unwrap();
        assert_eq!(&out[..preamble.len()], &preamble[..]);
        assert_eq!(&out[preamble.len()..], &source[8..]);
    }

    #[tokio::test]
    async fn test_merge_path_drops_deleted_rows() {
        let source = ids(&[100, 101, 102, 103, 104]);
        let marker = encode_offsets(&[1, 3]);
        let mut deletes = DeleteOffsets::open(&marker[..]).await.unwrap();

        let mut out = Vec::new();
        let header = publish_segment(&mut &source[..], &mut deletes, SegmentColumn::Id, &mut out, "s.uid")
            .await
            .unwrap();

        assert_eq!(header.deleted_row_offset, 2);
        let preamble = encode_header(&header).unwrap();
        assert!(String::from_utf8_lossy(&preamble).contains("'shape': (3,)"));

        let body: Vec<i64> = out[preamble.len()..]
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(body, vec![100, 102, 104]);
    }

    #[tokio::test]
    async fn test_vector_rows_move_as_whole_records() {
        let values: Vec<f32> = (0..6).map(|v| v as f32).collect();
        let source = encode_segment(&values, |v: f32| v.to_le_bytes().to_vec());
        let marker = encode_offsets(&[0]);
        let mut deletes = DeleteOffsets::open(&marker[..]).await.unwrap();

        let mut out = Vec::new();
        let column = SegmentColumn::Vector { dim: 2 };
        let header = publish_segment(&mut &source[..], &mut deletes, column, &mut out, "s.rv")
            .await
            .unwrap();

        assert_eq!(header.row_count, 3);
        assert_eq!(header.emitted_rows(), 2);
        let preamble_len = encode_header(&header).unwrap().len();
        assert_eq!(&out[preamble_len..], &source[8 + 8..]);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_decode_error() {
        let mut source = ids(&[1, 2, 3]);
        source.truncate(8 + 16);
        let marker = encode_offsets(&[]);
        let mut deletes = DeleteOffsets::open(&marker[..]).await.unwrap();

        let mut out = Vec::new();
        let err = publish_segment(&mut &source[..], &mut deletes, SegmentColumn::Id, &mut out, "s.uid")
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::DecodeFormat(_)));
    }

    #[tokio::test]
    async fn test_nan_vector_is_validation_error() {
        let source = encode_segment(&[1.0f32, f32::NAN], |v: f32| v.to_le_bytes().to_vec());
        let mut deletes = DeleteOffsets::<&[u8]>::empty();

        let mut out = Vec::new();
        let column = SegmentColumn::Vector { dim: 2 };
        let err = publish_segment(&mut &source[..], &mut deletes, column, &mut out, "s.rv")
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Validation(_)));
    }
}
