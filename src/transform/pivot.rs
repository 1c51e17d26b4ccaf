//! Long-to-wide reshaping of raw readings.

use crate::constants::canonical_sensor_name;
use crate::error::{IngestError, Result};
use crate::models::{Reading, StructuredRow, StructuredTable};
use crate::storage::read_raw;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, error, warn};

/// Concatenate the readings of every raw file in a group.
///
/// Files that do not exist yet are skipped: a month may be only partially
/// fetched. Unreadable files are logged and skipped. A file missing a
/// required column fails the whole group.
pub fn read_raw_group<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> Result<Vec<Reading>> {
    let mut readings = Vec::new();

    for path in paths {
        if !path.exists() {
            debug!("Raw file not present: {}", path.display());
            continue;
        }
        match read_raw(path) {
            Ok(mut batch) => readings.append(&mut batch),
            Err(e @ IngestError::MalformedRawData { .. }) => return Err(e),
            Err(e) => error!("Failed reading raw parquet {}: {}", path.display(), e),
        }
    }

    Ok(readings)
}

/// Pivot readings into one row per (timestamp, location).
///
/// Rows are ordered by timestamp then location and sensor columns
/// alphabetically. When a (timestamp, location, sensor) cell occurs more
/// than once the last reading wins. A renamed sensor that lands on a column
/// another sensor already fills is merged into it and logged.
pub fn pivot(readings: &[Reading]) -> StructuredTable {
    let mut cells: BTreeMap<(NaiveDateTime, &str), BTreeMap<&str, Option<f64>>> = BTreeMap::new();
    // Column name -> first raw sensor name seen for it
    let mut sources: BTreeMap<&str, &str> = BTreeMap::new();
    let mut collisions: BTreeSet<&str> = BTreeSet::new();

    for reading in readings {
        let sensor = canonical_sensor_name(&reading.sensor_name);
        let source = *sources.entry(sensor).or_insert(reading.sensor_name.as_str());
        if source != reading.sensor_name && collisions.insert(sensor) {
            warn!(
                "Sensors {:?} and {:?} both map to column {:?}; values are merged",
                source, reading.sensor_name, sensor
            );
        }
        cells
            .entry((reading.timestamp, reading.location.as_str()))
            .or_default()
            .insert(sensor, reading.value);
    }

    let rows = cells
        .into_iter()
        .map(|((timestamp, location), values)| StructuredRow {
            timestamp,
            location: location.to_string(),
            values: sources
                .keys()
                .map(|sensor| values.get(sensor).copied().flatten())
                .collect(),
        })
        .collect();

    StructuredTable::from_rows(sources.into_keys().map(str::to_string).collect(), rows)
}

/// Read and pivot a group's raw files in one step
pub fn build_wide_table(paths: &BTreeSet<PathBuf>) -> Result<Option<StructuredTable>> {
    let readings = read_raw_group(paths)?;
    if readings.is_empty() {
        return Ok(None);
    }
    Ok(Some(pivot(&readings)))
}
