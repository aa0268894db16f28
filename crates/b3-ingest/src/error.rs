//! Error types for the extraction engine

use thiserror::Error;

/// Result type alias for ETL operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Errors raised while extracting, normalizing or loading a source file
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Source {file} is unavailable: {reason}")]
    SourceUnavailable { file: String, reason: String },

    #[error("Source {file} is corrupt after line {line}: {source}")]
    SourceCorrupt {
        file: String,
        /// Zero-based index of the next line that could not be read
        line: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line}: field {field} is not a YYYYMMDD date: {value:?}")]
    MalformedDate {
        line: u64,
        field: &'static str,
        value: String,
    },

    #[error("Line {line}: field {field} is not an amount in cents: {value:?}")]
    MalformedAmount {
        line: u64,
        field: &'static str,
        value: String,
    },

    #[error("Line {line}: field {field} is not an integer: {value:?}")]
    MalformedInteger {
        line: u64,
        field: &'static str,
        value: String,
    },

    #[error("Invalid file identifier {file:?}: {reason}")]
    InvalidFileId { file: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] b3_common::CommonError),

    #[error("Insufficient privilege: {0}")]
    InsufficientPrivilege(String),

    #[error("File {0} is being processed by another worker")]
    FileLocked(String),

    #[error("Checkpoint for {file} would move backwards from {current} to {proposed}")]
    CheckpointRegression {
        file: String,
        current: u64,
        proposed: u64,
    },

    #[error("Extraction task failed: {0}")]
    Task(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EtlError {
    /// Data-quality failures raised by the normalizer
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            EtlError::MalformedDate { .. }
                | EtlError::MalformedAmount { .. }
                | EtlError::MalformedInteger { .. }
        )
    }

    /// Short machine-readable name used in run reports
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::SourceUnavailable { .. } => "source_unavailable",
            EtlError::SourceCorrupt { .. } => "source_corrupt",
            EtlError::MalformedDate { .. } => "malformed_date",
            EtlError::MalformedAmount { .. } => "malformed_amount",
            EtlError::MalformedInteger { .. } => "malformed_integer",
            EtlError::InvalidFileId { .. } => "invalid_file_id",
            EtlError::InvalidConfig(_) => "invalid_config",
            EtlError::InvalidIdentifier(_) => "invalid_identifier",
            EtlError::InsufficientPrivilege(_) => "insufficient_privilege",
            EtlError::FileLocked(_) => "file_locked",
            EtlError::CheckpointRegression { .. } => "checkpoint_regression",
            EtlError::Task(_) => "task",
            EtlError::Database(_) => "database",
        }
    }
}
