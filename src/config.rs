//! Configuration management and validation.
//!
//! Provides the workload description read at planning time and the
//! process-wide archive settings (endpoint, coordinates, retry policy)
//! injected into the fetch stage.

use crate::constants::{
    ARCHIVE_API_URL, DEFAULT_REQUEST_TIMEOUT_SECS, LOCATION_COORDINATES, MAX_FETCH_ATTEMPTS,
    RETRY_BACKOFF_SECS,
};
use crate::duration::parse_duration;
use crate::error::{IngestError, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Date range and step of a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateConfig {
    pub begin_date: NaiveDate,
    pub end_date: NaiveDate,
    /// ISO 8601 style duration, e.g. `+P1DT00H00M00S`
    pub time_increment: String,
}

/// A named location and the sensors requested for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub sensors: Vec<String>,
}

/// Output path templates; may contain `{location_name}` and strftime tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStorage {
    pub raw_output_dir: String,
    pub structured_output_dir: String,
}

/// Declarative workload description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub date_config: DateConfig,
    pub locations: Vec<Location>,
    pub local_storage: LocalStorage,
}

impl WorkloadConfig {
    /// Read and validate a workload file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            IngestError::config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;

        debug!(
            "Loaded workload from {}: {} locations, {} to {}",
            path.display(),
            config.locations.len(),
            config.date_config.begin_date,
            config.date_config.end_date
        );
        Ok(config)
    }

    /// Check every field constraint, reporting all violations at once
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();

        let dates = &self.date_config;
        if dates.end_date < dates.begin_date {
            violations.push(format!(
                "date_config.end_date ({}) must be on or after begin_date ({})",
                dates.end_date, dates.begin_date
            ));
        }
        if let Err(e) = parse_duration(&dates.time_increment) {
            violations.push(format!("date_config.time_increment: {}", e));
        }

        if self.locations.is_empty() {
            violations.push("locations must contain at least one location".to_string());
        }
        let mut seen = HashSet::new();
        for (idx, location) in self.locations.iter().enumerate() {
            if location.name.trim().is_empty() {
                violations.push(format!("locations[{}].name must not be empty", idx));
            } else if !seen.insert(location.name.as_str()) {
                violations.push(format!(
                    "locations[{}].name {:?} is duplicated",
                    idx, location.name
                ));
            }
            if location.sensors.is_empty() {
                violations.push(format!("locations[{}].sensors must not be empty", idx));
            }
            if location.sensors.iter().any(|s| s.trim().is_empty()) {
                violations.push(format!(
                    "locations[{}].sensors must not contain empty names",
                    idx
                ));
            }
        }

        if self.local_storage.raw_output_dir.trim().is_empty() {
            violations.push("local_storage.raw_output_dir must not be empty".to_string());
        }
        if self.local_storage.structured_output_dir.trim().is_empty() {
            violations.push("local_storage.structured_output_dir must not be empty".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(IngestError::Config { violations })
        }
    }

    /// The validated step between planned dates
    pub fn step(&self) -> Result<Duration> {
        parse_duration(&self.date_config.time_increment)
    }
}

/// Geographic position of a location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after a failed transport attempt
    pub backoff: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_FETCH_ATTEMPTS,
            backoff: std::time::Duration::from_secs(RETRY_BACKOFF_SECS),
        }
    }
}

/// Read-only settings for talking to the remote archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Archive endpoint URL
    pub endpoint: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Coordinates for every fetchable location
    pub coordinates: BTreeMap<String, Coordinates>,

    /// Retry policy for transport failures
    pub retry: RetryPolicy,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        let coordinates = LOCATION_COORDINATES
            .iter()
            .map(|(name, latitude, longitude)| {
                (
                    name.to_string(),
                    Coordinates {
                        latitude: *latitude,
                        longitude: *longitude,
                    },
                )
            })
            .collect();

        Self {
            endpoint: ARCHIVE_API_URL.to_string(),
            timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            coordinates,
            retry: RetryPolicy::default(),
        }
    }
}

impl ArchiveConfig {
    /// Use a different archive endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Register or replace the coordinates of a location
    pub fn with_location(mut self, name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        self.coordinates.insert(
            name.into(),
            Coordinates {
                latitude,
                longitude,
            },
        );
        self
    }

    /// Configure the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Coordinates of a location, if known
    pub fn coordinates_for(&self, location: &str) -> Option<Coordinates> {
        self.coordinates.get(location).copied()
    }
}
