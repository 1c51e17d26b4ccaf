//! Tests for the transform stage
//!
//! Raw and structured Parquet files are created in temporary directories and
//! run through pivoting, merging and the group driver.


use crate::models::{Reading, StructuredRow};
use chrono::{NaiveDate, NaiveDateTime};

/// Hourly timestamp on a January 2024 day
pub(super) fn ts(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

pub(super) fn reading(location: &str, day: u32, hour: u32, sensor: &str, value: Option<f64>) -> Reading {
    Reading {
        timestamp: ts(day, hour),
        location: location.to_string(),
        sensor_name: sensor.to_string(),
        value,
    }
}

pub(super) fn row(location: &str, day: u32, hour: u32, values: Vec<Option<f64>>) -> StructuredRow {
    StructuredRow {
        timestamp: ts(day, hour),
        location: location.to_string(),
        values,
    }
}

pub(super) fn sensors(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
