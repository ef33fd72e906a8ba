//! Error types for the reconciliation engine

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Reference workbook missing or unreadable. Aborts the whole batch.
    #[error("Failed to load reference workbook {path}: {message}")]
    Load { path: PathBuf, message: String },

    /// No phone column could be resolved in a detail file
    #[error("No phone column in {file}; expected one of: {expected}")]
    Schema { file: String, expected: String },

    /// Detail file unreadable or not shaped like a detail report
    #[error("Failed to parse {file}: {message}")]
    Parse { file: String, message: String },

    /// Output artifact could not be persisted
    #[error("Failed to write artifact {path}: {message}")]
    Write { path: PathBuf, message: String },

    /// A processed file could not be moved to the archive directory
    #[error("Failed to archive {path}: {message}")]
    Archive { path: PathBuf, message: String },

    /// File name does not follow the artifact naming convention
    #[error("Not an artifact file name: {0}")]
    ArtifactName(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
