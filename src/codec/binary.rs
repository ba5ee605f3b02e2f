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

//! Fallible little-endian primitives shared by the legacy decoders
//!
//! Every read returns `Result`; hitting end-of-file early surfaces as a
//! `DecodeFormat` error naming the field that was being read.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::error::{MigrationError, Result};
use crate::core::types::{ArrayHeader, ElementType};

/// Upper bound on the scratch buffer used when streaming records
const COPY_CHUNK_BYTES: usize = 64 * 1024;

pub async fn read_u8<R>(reader: &mut R, what: &str) -> Result<u8>
where
    R: AsyncRead + Unpin + ?Sized,
{
    reader.read_u8().await.map_err(|e| MigrationError::from_read(e, what))
}

pub async fn read_u32<R>(reader: &mut R, what: &str) -> Result<u32>
where
    R: AsyncRead + Unpin + ?Sized,
{
    reader.read_u32_le().await.map_err(|e| MigrationError::from_read(e, what))
}

pub async fn read_u64<R>(reader: &mut R, what: &str) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    reader.read_u64_le().await.map_err(|e| MigrationError::from_read(e, what))
}

pub async fn read_i32<R>(reader: &mut R, what: &str) -> Result<i32>
where
    R: AsyncRead + Unpin + ?Sized,
{
    reader.read_i32_le().await.map_err(|e| MigrationError::from_read(e, what))
}

/// Four-byte section tag
pub async fn read_tag<R>(reader: &mut R, what: &str) -> Result<[u8; 4]>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut tag = [0u8; 4];
    reader
        .read_exact(&mut tag)
        .await
        .map_err(|e| MigrationError::from_read(e, what))?;
    Ok(tag)
}

/// u64 value that must fit in memory-addressable size
pub async fn read_len<R>(reader: &mut R, what: &str) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let value = read_u64(reader, what).await?;
    usize::try_from(value)
        .map_err(|_| MigrationError::DecodeFormat(format!("{} {} does not fit in usize", what, value)))
}

/// Discard exactly `count` bytes
pub async fn skip_bytes<R>(reader: &mut R, count: u64, what: &str) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if count == 0 {
        return Ok(());
    }
    let mut limited = reader.take(count);
    let skipped = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
    if skipped != count {
        return Err(MigrationError::DecodeFormat(format!(
            "unexpected end of file while skipping {} ({} of {} bytes)",
            what, skipped, count
        )));
    }
    Ok(())
}

/// Reject non-finite floats; integers pass through
pub fn validate_records(buf: &[u8], element_type: ElementType) -> Result<()> {
    match element_type {
        ElementType::Float32 => {
            for bytes in buf.chunks_exact(4) {
                let value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                check_finite(value as f64)?;
            }
        }
        ElementType::Float64 => {
            for bytes in buf.chunks_exact(8) {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                check_finite(f64::from_le_bytes(raw))?;
            }
        }
        ElementType::Int32 | ElementType::Int64 => {}
    }
    Ok(())
}

fn check_finite(value: f64) -> Result<()> {
    if value.is_nan() {
        return Err(MigrationError::Validation("float value is not a number".to_string()));
    }
    if value.is_infinite() {
        return Err(MigrationError::Validation("float value is infinity".to_string()));
    }
    Ok(())
}

/// Stream `rows` whole records from `reader` to `writer`, validating each chunk
pub async fn copy_records<R, W>(
    reader: &mut R,
    writer: &mut W,
    header: &ArrayHeader,
    rows: usize,
) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let row_bytes = header.row_bytes();
    if rows == 0 || row_bytes == 0 {
        return Ok(0);
    }

    let rows_per_chunk = (COPY_CHUNK_BYTES / row_bytes).max(1);
    let mut buf = vec![0u8; rows_per_chunk * row_bytes];
    let mut remaining = rows;
    let mut written = 0u64;

    while remaining > 0 {
        let batch = remaining.min(rows_per_chunk);
        let chunk = &mut buf[..batch * row_bytes];
        reader
            .read_exact(chunk)
            .await
            .map_err(|e| MigrationError::from_read(e, "record payload"))?;
        validate_records(chunk, header.element_type)?;
        writer.write_all(chunk).await?;

        remaining -= batch;
        written += chunk.len() as u64;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_primitive_reads_are_little_endian() {
        let mut data: &[u8] = &[0x01, 0x02, 0x00, 0x00, 0x05, 0, 0, 0, 0, 0, 0, 0, 9];
        assert_eq!(read_u32(&mut data, "dim").await.unwrap(), 0x0201);
        assert_eq!(read_u64(&mut data, "ntotal").await.unwrap(), 5);
        assert_eq!(read_u8(&mut data, "flag").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_short_read_is_decode_error() {
        let mut data: &[u8] = &[1, 2, 3];
        let err = read_u64(&mut data, "byte length").await.unwrap_err();
        assert!(matches!(err, MigrationError::DecodeFormat(ref m) if m.contains("byte length")));

        let mut data: &[u8] = &[1, 2, 3];
        let err = skip_bytes(&mut data, 8, "reserved").await.unwrap_err();
        assert!(matches!(err, MigrationError::DecodeFormat(_)));
    }

    #[test]
    fn test_validate_rejects_nan_and_infinity() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1.5f32.to_le_bytes());
        assert!(validate_records(&buf, ElementType::Float32).is_ok());

        buf.extend_from_slice(&f32::NAN.to_le_bytes());
        assert!(matches!(
            validate_records(&buf, ElementType::Float32),
            Err(MigrationError::Validation(_))
        ));

        let inf = f64::INFINITY.to_le_bytes();
        assert!(validate_records(&inf, ElementType::Float64).is_err());
        assert!(validate_records(&inf, ElementType::Int64).is_ok());
    }

    #[tokio::test]
    async fn test_copy_records_exact_rows() {
        let header = ArrayHeader::new(3, 0, ElementType::Int64);
        let source: Vec<u8> = (1i64..=4).flat_map(|v| v.to_le_bytes()).collect();
        let mut reader: &[u8] = &source;
        let mut out = Vec::new();

        let written = copy_records(&mut reader, &mut out, &header, 3).await.unwrap();
        assert_eq!(written, 24);
        assert_eq!(out, &source[..24]);
        assert_eq!(reader.len(), 8);
    }
}
