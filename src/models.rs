//! Core data structures for the ingest pipeline.
//!
//! Defines the planned tasks and their manifest, the long-format readings
//! produced by the fetch stage, the wide-format table merged by the
//! transform stage, and per-stage summaries.

use crate::config::{DateConfig, LocalStorage, Location};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One (location, date) unit of work with its derived file paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub location: String,
    pub date: NaiveDate,
    pub raw_path: PathBuf,
    pub structured_path: PathBuf,
}

/// The planned workload, persisted between stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskManifest {
    pub date_config: DateConfig,
    pub locations: Vec<Location>,
    pub local_storage: LocalStorage,
    pub tasks: Vec<Task>,
}

impl TaskManifest {
    /// Sensors configured for a location, if the location is known
    pub fn sensors_for(&self, location: &str) -> Option<&[String]> {
        self.locations
            .iter()
            .find(|loc| loc.name == location)
            .map(|loc| loc.sensors.as_slice())
    }
}

/// A single sensor reading in long format
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    pub location: String,
    pub sensor_name: String,
    pub value: Option<f64>,
}

/// One wide-format row; `values` is aligned with the owning table's sensors
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredRow {
    pub timestamp: NaiveDateTime,
    pub location: String,
    pub values: Vec<Option<f64>>,
}

/// Wide-format table: the fixed (timestamp, location) pair followed by one
/// nullable column per sensor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredTable {
    sensors: Vec<String>,
    rows: Vec<StructuredRow>,
}

impl StructuredTable {
    /// Create an empty table with the given sensor columns
    pub fn new(sensors: Vec<String>) -> Self {
        Self {
            sensors,
            rows: Vec::new(),
        }
    }

    /// Build a table from rows already aligned with `sensors`
    pub fn from_rows(sensors: Vec<String>, rows: Vec<StructuredRow>) -> Self {
        debug_assert!(rows.iter().all(|row| row.values.len() == sensors.len()));
        Self { sensors, rows }
    }

    pub fn sensors(&self) -> &[String] {
        &self.sensors
    }

    pub fn rows(&self) -> &[StructuredRow] {
        &self.rows
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<StructuredRow>) {
        (self.sensors, self.rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All column labels in on-disk order
    pub fn column_names(&self) -> Vec<String> {
        crate::constants::columns::FIXED
            .iter()
            .map(|c| c.to_string())
            .chain(self.sensors.iter().cloned())
            .collect()
    }

    /// Find the row for a (timestamp, location) key
    pub fn row(&self, timestamp: NaiveDateTime, location: &str) -> Option<&StructuredRow> {
        self.rows
            .iter()
            .find(|row| row.timestamp == timestamp && row.location == location)
    }

    /// Value of `sensor` in `row`; `None` for a null cell or unknown column
    pub fn value(&self, row: &StructuredRow, sensor: &str) -> Option<f64> {
        self.sensors
            .iter()
            .position(|s| s == sensor)
            .and_then(|idx| row.values.get(idx).copied().flatten())
    }

    /// Re-align every row onto `sensors`, introducing nulls for columns this
    /// table does not have. A repeated label reads from its first occurrence.
    pub fn reindex(self, sensors: &[String]) -> Self {
        let mapping: Vec<Option<usize>> = sensors
            .iter()
            .map(|target| self.sensors.iter().position(|s| s == target))
            .collect();

        let rows = self
            .rows
            .into_iter()
            .map(|row| StructuredRow {
                values: mapping
                    .iter()
                    .map(|source| source.and_then(|idx| row.values[idx]))
                    .collect(),
                timestamp: row.timestamp,
                location: row.location,
            })
            .collect();

        Self {
            sensors: sensors.to_vec(),
            rows,
        }
    }

    /// Collapse repeated column labels, keeping the first of each
    pub fn dedup_columns(self) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(self.sensors.len());
        for sensor in &self.sensors {
            if !unique.contains(sensor) {
                unique.push(sensor.clone());
            }
        }
        if unique.len() == self.sensors.len() {
            return self;
        }
        self.reindex(&unique)
    }
}

/// A task that could not be completed during the fetch stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTask {
    pub location: String,
    pub date: NaiveDate,
    pub reason: String,
}

/// Aggregate outcome of the fetch stage
#[derive(Debug, Default)]
pub struct FetchSummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failed_tasks: Vec<FailedTask>,
    pub processing_time_ms: u128,
}

impl FetchSummary {
    /// Dates of every failed task, in the order they failed
    pub fn failed_dates(&self) -> Vec<NaiveDate> {
        self.failed_tasks.iter().map(|t| t.date).collect()
    }
}

/// Aggregate outcome of the transform stage
#[derive(Debug, Default)]
pub struct TransformSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_rows: usize,
    pub processing_time_ms: u128,
}
