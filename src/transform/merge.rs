//! Upsert of a freshly pivoted month against its stored partition.
//!
//! Historical rows come first, new rows second; after a stable sort by
//! timestamp only the last row per (timestamp, location) survives, so new
//! data always replaces stored data for the same instant. Sensor columns
//! are the union of both sides, which absorbs sensors added over time.

use crate::models::{StructuredRow, StructuredTable};
use crate::storage::{read_structured, round_nanos_to_millis};
use chrono::NaiveDateTime;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, error};

/// Merge `new` with whatever is stored at `structured_path`.
///
/// A missing or unreadable stored file is treated as an empty table.
pub fn merge_with_historical(new: StructuredTable, structured_path: &Path) -> StructuredTable {
    let historical = if structured_path.exists() {
        match read_structured(structured_path) {
            Ok(table) => {
                debug!(
                    "Loaded {} historical rows from {}",
                    table.len(),
                    structured_path.display()
                );
                table
            }
            Err(e) => {
                error!(
                    "Failed reading historical parquet {}: {}",
                    structured_path.display(),
                    e
                );
                StructuredTable::new(new.sensors().to_vec())
            }
        }
    } else {
        StructuredTable::new(new.sensors().to_vec())
    };

    merge_tables(historical, new)
}

/// Merge two wide tables; rows of `new` win on (timestamp, location) ties
pub fn merge_tables(historical: StructuredTable, new: StructuredTable) -> StructuredTable {
    let historical = historical.dedup_columns();
    let new = new.dedup_columns();

    let sensors: Vec<String> = historical
        .sensors()
        .iter()
        .chain(new.sensors())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let (_, historical_rows) = historical.reindex(&sensors).into_parts();
    let (_, new_rows) = new.reindex(&sensors).into_parts();

    let mut combined: Vec<StructuredRow> = historical_rows
        .into_iter()
        .map(round_row_to_millis)
        .chain(new_rows)
        .collect();
    combined.sort_by_key(|row| row.timestamp);

    StructuredTable::from_rows(sensors, keep_last_per_key(combined))
}

/// De-duplicate on (timestamp, location), keeping the last occurrence in place
fn keep_last_per_key(rows: Vec<StructuredRow>) -> Vec<StructuredRow> {
    let mut last_index: HashMap<(NaiveDateTime, &str), usize> = HashMap::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        last_index.insert((row.timestamp, row.location.as_str()), idx);
    }
    let keep: Vec<bool> = rows
        .iter()
        .enumerate()
        .map(|(idx, row)| last_index[&(row.timestamp, row.location.as_str())] == idx)
        .collect();

    let before = rows.len();
    let kept: Vec<StructuredRow> = rows
        .into_iter()
        .zip(keep)
        .filter_map(|(row, keep)| keep.then_some(row))
        .collect();
    if kept.len() < before {
        debug!("Dropped {} superseded rows", before - kept.len());
    }
    kept
}

/// Rounds a stored timestamp to millisecond resolution
fn round_row_to_millis(mut row: StructuredRow) -> StructuredRow {
    if let Some(nanos) = row.timestamp.and_utc().timestamp_nanos_opt() {
        let millis = round_nanos_to_millis(nanos);
        if let Some(rounded) = chrono::DateTime::from_timestamp_millis(millis) {
            row.timestamp = rounded.naive_utc();
        }
    }
    row
}
