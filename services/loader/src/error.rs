//! Error types for the loader pipeline.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::model::EntityKind;

/// Errors raised by a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness invariant would be violated by the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced record vanished between lookup and write.
    #[error("{kind} '{key}' does not exist")]
    Dangling { kind: &'static str, key: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// File-level and ingestion-level failures.
///
/// Row-level violations are not errors in this sense: they are collected
/// as [`RowError`] values and reported together.
#[derive(Debug, Error)]
pub enum LoadError {
    // === File errors ===
    #[error("failed to read file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported file format: {path} (expected .csv, .xlsx, .xls or .ods)")]
    UnsupportedFormat { path: PathBuf },

    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to open spreadsheet {path}: {message}")]
    Spreadsheet { path: PathBuf, message: String },

    #[error("spreadsheet {path} has no sheets")]
    EmptyWorkbook { path: PathBuf },

    #[error("file has no header row")]
    NoHeader,

    // === Structure ===
    #[error("Missing required columns: {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String> },

    #[error("Columns given more than once: {}", .columns.join(", "))]
    DuplicateColumns { columns: Vec<String> },

    #[error("{kind} files require an institution context")]
    InstitutionRequired { kind: EntityKind },

    // === Ingestion ===
    #[error("row {row}: {message}")]
    UnresolvedReference { row: usize, message: String },

    #[error("row {row} could not be ingested: {message}")]
    Rejected { row: usize, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One validation finding. `row` is the visual line number in the file;
/// file-level findings carry no row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row: Option<usize>,
    pub message: String,
}

impl RowError {
    pub fn at(row: usize, message: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            message: message.into(),
        }
    }

    pub fn file(message: impl Into<String>) -> Self {
        Self {
            row: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.row {
            Some(row) => write!(f, "Row {}: {}", row, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message_lists_all() {
        let err = LoadError::MissingColumns {
            columns: vec!["gender".into(), "birth_date".into()],
        };
        assert_eq!(
            err.to_string(),
            "Missing required columns: gender, birth_date"
        );
    }

    #[test]
    fn test_row_error_display() {
        assert_eq!(RowError::at(3, "Missing student_id").to_string(), "Row 3: Missing student_id");
        assert_eq!(RowError::file("bad file").to_string(), "bad file");
    }
}
