//! Error types for the binning core.
//!
//! The bin group, contig filter and k-mer databases report failures through `BinError`.
//! Phase drivers and the command layer wrap these in `anyhow` with additional context.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for binning operations.
pub type Result<T> = std::result::Result<T, BinError>;

#[derive(Debug, Error)]
pub enum BinError {
    /// Unreadable or malformed contig input.
    #[error("Invalid input in {path}: {msg}")]
    Input { path: PathBuf, msg: String },

    /// Out-of-range tuning parameter.
    #[error("Invalid parameter: {0}")]
    Config(String),

    /// Violation of a bin group invariant. Indicates a logic error in the caller.
    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    /// Malformed checkpoint or table file.
    #[error("Invalid format in {path}: {msg}")]
    Format { path: PathBuf, msg: String },

    /// Failure reported by the seed-protein finder or the genome source.
    #[error("{0}")]
    Collaborator(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BinError {
    pub fn input(path: impl Into<PathBuf>, msg: impl ToString) -> Self {
        BinError::Input {
            path: path.into(),
            msg: msg.to_string(),
        }
    }

    pub fn format(path: impl Into<PathBuf>, msg: impl ToString) -> Self {
        BinError::Format {
            path: path.into(),
            msg: msg.to_string(),
        }
    }
}
