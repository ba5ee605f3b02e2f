use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{MigrationError, Result};

pub type CollectionName = String;

/// Opaque bulk-insert job identifier handed out by the target database
pub type TaskId = String;

/// Element type of a numpy column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Float32,
    Float64,
    Int32,
    Int64,
}

impl ElementType {
    /// Little-endian numpy dtype descriptor
    pub fn descr(&self) -> &'static str {
        match self {
            ElementType::Float32 => "<f4",
            ElementType::Float64 => "<f8",
            ElementType::Int32 => "<i4",
            ElementType::Int64 => "<i8",
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            ElementType::Float32 | ElementType::Int32 => 4,
            ElementType::Float64 | ElementType::Int64 => 8,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
        };
        f.write_str(name)
    }
}

/// Shape and type of one decoded array.
///
/// `dim == 0` marks a scalar column; such a column still reads one element per
/// row. `deleted_row_offset` is the number of rows dropped by tombstones, so the
/// rendered shape is `row_count - deleted_row_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayHeader {
    pub total_elements: usize,
    pub row_count: usize,
    pub dim: usize,
    pub element_type: ElementType,
    pub deleted_row_offset: usize,
}

impl ArrayHeader {
    /// Header for a fixed-record file whose byte length is known up front
    pub fn from_byte_length(byte_length: u64, dim: usize, element_type: ElementType) -> Result<Self> {
        let element_size = element_type.size_bytes() as u64;
        if byte_length % element_size != 0 {
            return Err(MigrationError::DecodeFormat(format!(
                "byte length {} is not a multiple of the {} element size",
                byte_length, element_type
            )));
        }

        let total = (byte_length / element_size) as usize;
        let width = dim.max(1);
        if total % width != 0 {
            return Err(MigrationError::DecodeFormat(format!(
                "check total != row*dim, total={}, dim={}",
                total, dim
            )));
        }

        Ok(Self {
            total_elements: total,
            row_count: total / width,
            dim,
            element_type,
            deleted_row_offset: 0,
        })
    }

    pub fn new(row_count: usize, dim: usize, element_type: ElementType) -> Self {
        Self {
            total_elements: row_count * dim.max(1),
            row_count,
            dim,
            element_type,
            deleted_row_offset: 0,
        }
    }

    /// Elements making up one row
    pub fn row_width(&self) -> usize {
        self.dim.max(1)
    }

    pub fn row_bytes(&self) -> usize {
        self.row_width() * self.element_type.size_bytes()
    }

    /// Rows that end up in the emitted array
    pub fn emitted_rows(&self) -> usize {
        self.row_count - self.deleted_row_offset
    }

    /// Record how many rows tombstones remove; cannot exceed the row count
    pub fn with_deleted_rows(mut self, deleted: usize) -> Result<Self> {
        if deleted > self.row_count {
            return Err(MigrationError::Validation(format!(
                "delete count {} exceeds row count {}",
                deleted, self.row_count
            )));
        }
        self.deleted_row_offset = deleted;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_from_byte_length() {
        let header = ArrayHeader::from_byte_length(5 * 4 * 4, 4, ElementType::Float32).unwrap();
        assert_eq!(header.row_count, 5);
        assert_eq!(header.total_elements, 20);
        assert_eq!(header.row_bytes(), 16);

        let ids = ArrayHeader::from_byte_length(3 * 8, 0, ElementType::Int64).unwrap();
        assert_eq!(ids.row_count, 3);
        assert_eq!(ids.row_width(), 1);
    }

    #[test]
    fn test_header_rejects_partial_rows() {
        let err = ArrayHeader::from_byte_length(3 * 4, 2, ElementType::Float32).unwrap_err();
        assert!(matches!(err, MigrationError::DecodeFormat(_)));
    }

    #[test]
    fn test_deleted_rows_bounded_by_row_count() {
        let header = ArrayHeader::new(2, 0, ElementType::Int64);
        assert!(header.with_deleted_rows(2).is_ok());
        assert!(header.with_deleted_rows(3).is_err());
    }
}
