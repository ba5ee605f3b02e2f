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

//! Numpy `.npy` v1.0 envelope
//!
//! Layout:
//! ```text
//! \x93NUMPY | major=1 | minor=0 | u16 LE header_len | descriptor + spaces + '\n'
//! ```
//! The descriptor is padded so the whole preamble is a multiple of 16 bytes,
//! letting consumers stream the record payload that follows without buffering.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::core::error::{MigrationError, Result};
use crate::core::types::ArrayHeader;

pub const NUMPY_MAGIC: &[u8; 6] = b"\x93NUMPY";
pub const MAJOR_VERSION: u8 = 1;
pub const MINOR_VERSION: u8 = 0;

/// magic + major + minor + u16 length
const FIXED_PREFIX_LEN: usize = 10;
const ALIGNMENT: usize = 16;

/// Python tuple literal for the array shape
pub fn shape_string(rows: usize, dim: usize) -> String {
    match (rows, dim) {
        (0, 0) => "()".to_string(),
        (rows, 0) => format!("({},)", rows),
        (rows, dim) => format!("({}, {})", rows, dim),
    }
}

fn descriptor(header: &ArrayHeader) -> String {
    format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        header.element_type.descr(),
        shape_string(header.emitted_rows(), header.dim)
    )
}

/// Render the complete preamble for `header`
///
/// The shape reflects emitted rows, i.e. the row count minus tombstoned rows.
pub fn encode_header(header: &ArrayHeader) -> Result<Vec<u8>> {
    let mut dict = descriptor(header);
    let unpadded = FIXED_PREFIX_LEN + dict.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    dict.extend(std::iter::repeat(' ').take(padding));
    dict.push('\n');

    let header_len = u16::try_from(dict.len()).map_err(|_| {
        MigrationError::DecodeFormat(format!("numpy header of {} bytes exceeds v1.0 limit", dict.len()))
    })?;

    let mut out = Vec::with_capacity(FIXED_PREFIX_LEN + dict.len());
    out.extend_from_slice(NUMPY_MAGIC);
    out.push(MAJOR_VERSION);
    out.push(MINOR_VERSION);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    Ok(out)
}

/// Write the preamble ahead of the record stream
pub async fn write_header<W>(writer: &mut W, header: &ArrayHeader) -> Result<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = encode_header(header)?;
    writer.write_all(&bytes).await?;
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ElementType;

    #[test]
    fn test_shape_rendering() {
        assert_eq!(shape_string(5, 0), "(5,)");
        assert_eq!(shape_string(0, 0), "()");
        assert_eq!(shape_string(3, 4), "(3, 4)");
    }

    #[test]
    fn test_header_is_aligned_and_terminated() {
        for (rows, dim) in [(0, 0), (5, 0), (3, 4), (123456, 768)] {
            let header = ArrayHeader::new(rows, dim, ElementType::Float32);
            let bytes = encode_header(&header).unwrap();

            assert_eq!(bytes.len() % 16, 0, "rows={} dim={}", rows, dim);
            assert_eq!(&bytes[..6], NUMPY_MAGIC);
            assert_eq!(bytes[6], 1);
            assert_eq!(bytes[7], 0);
            let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
            assert_eq!(header_len + 10, bytes.len());
            assert_eq!(*bytes.last().unwrap(), b'\n');
        }
    }

    #[test]
    fn test_descriptor_text() {
        let header = ArrayHeader::new(3, 4, ElementType::Float32);
        let bytes = encode_header(&header).unwrap();
        let text = std::str::from_utf8(&bytes[10..]).unwrap();
        assert!(text.starts_with("{'descr': '<f4', 'fortran_order': False, 'shape': (3, 4), }"));
        assert!(text.trim_end_matches('\n').trim_end().ends_with('}'));
    }

    #[test]
    fn test_shape_excludes_deleted_rows() {
        let header = ArrayHeader::new(5, 0, ElementType::Int64)
            .with_deleted_rows(2)
            .unwrap();
        let bytes = encode_header(&header).unwrap();
        let text = String::from_utf8_lossy(&bytes[10..]);
        assert!(text.contains("'descr': '<i8'"));
        assert!(text.contains("'shape': (3,)"));
    }

    #[tokio::test]
    async fn test_write_header_to_async_sink() {
        let header = ArrayHeader::new(2, 4, ElementType::Float32);
        let mut out = Vec::new();
        let written = write_header(&mut out, &header).await.unwrap();
        assert_eq!(written, out.len());
        assert_eq!(out, encode_header(&header).unwrap());
    }
}
