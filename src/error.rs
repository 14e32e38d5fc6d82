//! Error types for the FITS catalog
//!
//! Fail-fast stages propagate a `CatalogError`. Best-effort stages (moves,
//! restores, plate solving) turn each failure into a per-item value on their
//! report and keep going.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// I/O operation error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error from the catalog store
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Directory walk failed
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// FITS header unreadable or malformed
    #[error("Bad FITS header in {path}: {reason}")]
    Header { path: PathBuf, reason: String },

    /// Metadata extraction failed for one file
    #[error("Extraction failed for {path}: {source}")]
    Extraction {
        path: PathBuf,
        #[source]
        source: Box<CatalogError>,
    },

    /// Destination already holds an unrelated file
    #[error("Placement conflict: {destination} already exists (moving {from})")]
    PlacementConflict { from: PathBuf, destination: PathBuf },

    /// Filesystem rename failed
    #[error("Move {from} -> {to} failed: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// External plate solver failed or produced unusable output
    #[error("Plate solve failed for {path}: {reason}")]
    Solve { path: PathBuf, reason: String },

    /// More than one recovery file shares the hash of a catalog record
    #[error("Record {old_id} matches {} recovery files: {candidates:?}", .candidates.len())]
    MatchAmbiguous { old_id: i64, candidates: Vec<i64> },

    /// Table was expected in the catalog but is absent
    #[error("Table not found: {0}")]
    MissingTable(String),

    /// Table name is not a plain SQL identifier
    #[error("Invalid table name: {0:?}")]
    InvalidTableName(String),
}

impl CatalogError {
    pub(crate) fn header(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        CatalogError::Header {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, source: CatalogError) -> Self {
        CatalogError::Extraction {
            path: path.into(),
            source: Box::new(source),
        }
    }
}
