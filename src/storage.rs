//! Parquet persistence for raw and structured partitions.
//!
//! Raw files hold long-format readings, structured files hold wide-format
//! monthly tables. Timestamps are stored as naive UTC `Datetime(ms)`. Every
//! write goes to a temporary sibling first and is renamed over the target,
//! so a partition path only ever holds a complete file.

use crate::constants::columns;
use crate::error::{IngestError, Result};
use crate::models::{Reading, StructuredRow, StructuredTable};
use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Write long-format readings; an empty slice yields a header-only file
pub fn write_raw(readings: &[Reading], path: &Path) -> Result<()> {
    let timestamps = timestamp_series(readings.iter().map(|r| r.timestamp))
        .map_err(|e| IngestError::storage_write(path, e))?;
    let locations: Vec<&str> = readings.iter().map(|r| r.location.as_str()).collect();
    let sensors: Vec<&str> = readings.iter().map(|r| r.sensor_name.as_str()).collect();
    let values: Vec<Option<f64>> = readings.iter().map(|r| r.value).collect();

    let df = DataFrame::new(vec![
        timestamps.into(),
        Series::new(columns::LOCATION.into(), locations).into(),
        Series::new(columns::SENSOR_NAME.into(), sensors).into(),
        Series::new(columns::VALUE.into(), values).into(),
    ])
    .map_err(|e| IngestError::storage_write(path, e))?;

    write_frame(df, path)
}

/// Write a wide-format table with columns in the table's order
pub fn write_structured(table: &StructuredTable, path: &Path) -> Result<()> {
    let rows = table.rows();
    let timestamps = timestamp_series(rows.iter().map(|r| r.timestamp))
        .map_err(|e| IngestError::storage_write(path, e))?;
    let locations: Vec<&str> = rows.iter().map(|r| r.location.as_str()).collect();

    let mut frame_columns: Vec<Column> = Vec::with_capacity(table.sensors().len() + 2);
    frame_columns.push(timestamps.into());
    frame_columns.push(Series::new(columns::LOCATION.into(), locations).into());
    for (idx, sensor) in table.sensors().iter().enumerate() {
        let values: Vec<Option<f64>> = rows.iter().map(|r| r.values[idx]).collect();
        frame_columns.push(Series::new(sensor.as_str().into(), values).into());
    }

    let df = DataFrame::new(frame_columns).map_err(|e| IngestError::storage_write(path, e))?;
    write_frame(df, path)
}

/// Read a raw long-format file, checking the required columns first
pub fn read_raw(path: &Path) -> Result<Vec<Reading>> {
    let df = read_frame(path)?;

    let present: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();
    let missing: Vec<String> = columns::RAW_REQUIRED
        .iter()
        .filter(|required| !present.iter().any(|p| p == *required))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MalformedRawData {
            path: path.to_path_buf(),
            missing,
        });
    }

    let timestamps = timestamp_column(&df)?;
    let locations = string_column(&df, columns::LOCATION)?;
    let sensors = string_column(&df, columns::SENSOR_NAME)?;
    let values = float_column(&df, columns::VALUE)?;

    let mut readings = Vec::with_capacity(df.height());
    let mut dropped = 0usize;
    for (((timestamp, location), sensor_name), value) in
        timestamps.into_iter().zip(locations).zip(sensors).zip(values)
    {
        match (timestamp, location, sensor_name) {
            (Some(timestamp), Some(location), Some(sensor_name)) => readings.push(Reading {
                timestamp,
                location,
                sensor_name,
                value,
            }),
            _ => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!("Dropped {} raw rows with null keys in {}", dropped, path.display());
    }

    Ok(readings)
}

/// Read a structured file; every column besides the fixed pair is a sensor
pub fn read_structured(path: &Path) -> Result<StructuredTable> {
    let df = read_frame(path)?;

    let timestamps = timestamp_column(&df)?;
    let locations = string_column(&df, columns::LOCATION)?;

    let sensors: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|c| c.to_string())
        .filter(|c| !columns::FIXED.contains(&c.as_str()))
        .collect();
    let sensor_values = sensors
        .iter()
        .map(|sensor| float_column(&df, sensor))
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::with_capacity(df.height());
    for (idx, (timestamp, location)) in timestamps.into_iter().zip(locations).enumerate() {
        let (Some(timestamp), Some(location)) = (timestamp, location) else {
            continue;
        };
        rows.push(StructuredRow {
            timestamp,
            location,
            values: sensor_values.iter().map(|col| col[idx]).collect(),
        });
    }

    Ok(StructuredTable::from_rows(sensors, rows))
}

fn write_frame(mut df: DataFrame, path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| IngestError::storage_write(path, e))?;

    let mut staging =
        NamedTempFile::new_in(parent).map_err(|e| IngestError::storage_write(path, e))?;
    ParquetWriter::new(staging.as_file_mut())
        .with_compression(ParquetCompression::Snappy)
        .finish(&mut df)
        .map_err(|e| IngestError::storage_write(path, e))?;
    staging
        .persist(path)
        .map_err(|e| IngestError::storage_write(path, e.error))?;

    debug!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

fn read_frame(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)?;
    Ok(ParquetReader::new(file).finish()?)
}

fn timestamp_series(timestamps: impl Iterator<Item = NaiveDateTime>) -> PolarsResult<Series> {
    let millis: Vec<i64> = timestamps
        .map(|ts| ts.and_utc().timestamp_millis())
        .collect();
    Series::new(columns::TIMESTAMP.into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
}

/// Timestamps rounded to the nearest millisecond, whatever unit is on disk
fn timestamp_column(df: &DataFrame) -> Result<Vec<Option<NaiveDateTime>>> {
    let nanos = df
        .column(columns::TIMESTAMP)?
        .as_materialized_series()
        .cast(&DataType::Datetime(TimeUnit::Nanoseconds, None))?
        .cast(&DataType::Int64)?;

    Ok(nanos
        .i64()?
        .into_iter()
        .map(|ns| ns.and_then(|ns| from_millis(round_nanos_to_millis(ns))))
        .collect())
}

fn string_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

/// Round a nanosecond epoch offset to the nearest millisecond
pub(crate) fn round_nanos_to_millis(nanos: i64) -> i64 {
    nanos.saturating_add(500_000).div_euclid(1_000_000)
}

fn from_millis(millis: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}
