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

//! `deleted_docs` reader: an 8-byte LE byte length followed by int32 row offsets

use tokio::io::AsyncRead;

use super::binary;
use crate::core::error::{MigrationError, Result};

const OFFSET_BYTES: u64 = 4;

/// Ascending stream of deleted row offsets
///
/// Offsets are checked as they are pulled: each must be non-negative, strictly
/// greater than the previous one, and below the owning segment's row count.
pub struct DeleteOffsets<R> {
    reader: Option<R>,
    count: usize,
    consumed: usize,
    last: Option<usize>,
}

impl<R> DeleteOffsets<R>
where
    R: AsyncRead + Unpin,
{
    /// Read the length prefix; the offsets themselves are pulled lazily
    pub async fn open(mut reader: R) -> Result<Self> {
        let byte_length = binary::read_u64(&mut reader, "deleted_docs byte length").await?;
        if byte_length % OFFSET_BYTES != 0 {
            return Err(MigrationError::DecodeFormat(format!(
                "deleted_docs byte length {} is not a multiple of {}",
                byte_length, OFFSET_BYTES
            )));
        }
        let count = usize::try_from(byte_length / OFFSET_BYTES).map_err(|_| {
            MigrationError::DecodeFormat(format!("deleted_docs byte length {} too large", byte_length))
        })?;

        Ok(Self {
            reader: Some(reader),
            count,
            consumed: 0,
            last: None,
        })
    }

    /// A segment with no marker file has nothing deleted
    pub fn empty() -> Self {
        Self {
            reader: None,
            count: 0,
            consumed: 0,
            last: None,
        }
    }

    /// Number of offsets announced by the length prefix
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Next deleted row, or `None` once every offset has been consumed
    pub async fn next_offset(&mut self, row_count: usize) -> Result<Option<usize>> {
        if self.consumed == self.count {
            return Ok(None);
        }
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        let raw = binary::read_i32(reader, "deleted_docs offset").await?;
        self.consumed += 1;

        let offset = usize::try_from(raw)
            .map_err(|_| MigrationError::Validation(format!("negative delete offset {}", raw)))?;
        if let Some(last) = self.last {
            if offset <= last {
                return Err(MigrationError::Validation(format!(
                    "delete offsets must be strictly ascending: {} follows {}",
                    offset, last
                )));
            }
        }
        if offset >= row_count {
            return Err(MigrationError::Validation(format!(
                "delete offset {} out of range for {} rows",
                offset, row_count
            )));
        }

        self.last = Some(offset);
        Ok(Some(offset))
    }
}

#[cfg(test)]
pub(crate) fn encode_offsets(offsets: &[i32]) -> Vec<u8> {
    let mut out = ((offsets.len() * 4) as u64).to_le_bytes().to_vec();
    for offset in offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_ascending_offsets() {
        let data = encode_offsets(&[1, 3]);
        let mut offsets = DeleteOffsets::open(&data[..]).await.unwrap();
        assert_eq!(offsets.count(), 2);

        assert_eq!(offsets.next_offset(5).await.unwrap(), Some(1));
        assert_eq!(offsets.next_offset(5).await.unwrap(), Some(3));
        assert_eq!(offsets.next_offset(5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_marker_file() {
        let data = encode_offsets(&[]);
        let mut offsets = DeleteOffsets::open(&data[..]).await.unwrap();
        assert!(offsets.is_empty());
        assert_eq!(offsets.next_offset(5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_unsorted_and_duplicate_offsets() {
        let data = encode_offsets(&[3, 1]);
        let mut offsets = DeleteOffsets::open(&data[..]).await.unwrap();
        offsets.next_offset(5).await.unwrap();
        assert!(matches!(
            offsets.next_offset(5).await,
            Err(MigrationError::Validation(_))
        ));

        let data = encode_offsets(&[2, 2]);
        let mut offsets = DeleteOffsets::open(&data[..]).await.unwrap();
        offsets.next_offset(5).await.unwrap();
        assert!(offsets.next_offset(5).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_offsets() {
        let data = encode_offsets(&[5]);
        let mut offsets = DeleteOffsets::open(&data[..]).await.unwrap();
        assert!(matches!(
            offsets.next_offset(5).await,
            Err(MigrationError::Validation(_))
        ));

        let data = encode_offsets(&[-1]);
        let mut offsets = DeleteOffsets::open(&data[..]).await.unwrap();
        assert!(offsets.next_offset(5).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_marker_file() {
        let mut data = encode_offsets(&[1, 2]);
        data.truncate(10);
        let mut offsets = DeleteOffsets::open(&data[..]).await.unwrap();
        assert!(matches!(
            offsets.next_offset(5).await,
            Err(MigrationError::DecodeFormat(_))
        ));

        let bad_length = 6u64.to_le_bytes();
        assert!(DeleteOffsets::open(&bad_length[..]).await.is_err());
    }
}
