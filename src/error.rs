//! Error handling for the ingest pipeline.
//!
//! Structural failures (configuration, manifest I/O) abort a stage. The
//! per-unit variants are raised for a single task or monthly group and are
//! caught, logged and counted by the stage drivers.

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Invalid workload configuration: {}", violations.join("; "))]
    Config { violations: Vec<String> },

    #[error("Invalid ISO 8601 duration: {input:?}")]
    InvalidDurationFormat { input: String },

    #[error("Duration must be strictly positive: {input:?}")]
    NonPositiveDuration { input: String },

    #[error("Unknown location: {location}")]
    UnknownLocation { location: String },

    #[error("Request for {location} {date} failed after {attempts} attempts: {message}")]
    TransportFailure {
        location: String,
        date: NaiveDate,
        attempts: u32,
        message: String,
    },

    #[error("HTTP error for {location} {date}: status {status}")]
    DefinitiveRequestError {
        location: String,
        date: NaiveDate,
        status: u16,
    },

    #[error("Malformed archive response for {location}: {reason}")]
    MalformedResponse { location: String, reason: String },

    #[error("Malformed raw data in {path}: missing columns {missing:?}")]
    MalformedRawData { path: PathBuf, missing: Vec<String> },

    #[error("Failed to write {path}: {source}")]
    StorageWriteError {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl IngestError {
    /// Create a configuration error from a single violation
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            violations: vec![message.into()],
        }
    }

    /// Wrap an underlying failure as a storage write error for `path`
    pub fn storage_write(
        path: impl Into<PathBuf>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::StorageWriteError {
            path: path.into(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
