//! Transform stage: raw daily files into merged monthly partitions.
//!
//! Tasks are grouped by (location, month). Each group's raw files are
//! pivoted into one wide table, upserted against the stored partition and
//! written back atomically. A failing group is logged and counted; the
//! remaining groups still run.

pub mod grouping;
pub mod merge;
pub mod pivot;

#[cfg(test)]
mod tests;

use self::grouping::{GroupKey, MonthGroup, group_tasks};
use self::merge::merge_with_historical;
use self::pivot::build_wide_table;

use crate::error::Result;
use crate::models::{TaskManifest, TransformSummary};
use crate::planner::load_manifest;
use crate::storage::write_structured;

use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info};

/// Outcome of transforming one (location, month) group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    /// No raw data was available for the group
    Skipped,
    /// The partition was rewritten with this many rows
    Written { rows: usize },
}

/// Pivot, merge and persist a single group
pub fn transform_group(key: &GroupKey, group: &MonthGroup) -> Result<GroupOutcome> {
    let Some(wide) = build_wide_table(&group.raw_paths)? else {
        debug!("No raw data for {}", key);
        return Ok(GroupOutcome::Skipped);
    };

    let merged = merge_with_historical(wide, &group.structured_path);
    write_structured(&merged, &group.structured_path)?;

    Ok(GroupOutcome::Written { rows: merged.len() })
}

/// Transform every group of a manifest, isolating per-group failures
pub fn transform_groups(manifest: &TaskManifest) -> TransformSummary {
    let mut summary = TransformSummary::default();

    for (key, group) in group_tasks(&manifest.tasks) {
        match transform_group(&key, &group) {
            Ok(GroupOutcome::Skipped) => summary.skipped += 1,
            Ok(GroupOutcome::Written { rows }) => {
                info!(
                    "Wrote {} ({} rows) for {}",
                    group.structured_path.display(),
                    rows,
                    key
                );
                summary.processed += 1;
                summary.total_rows += rows;
            }
            Err(e) => {
                error!("Transform failed for {}: {}", key, e);
                summary.failed += 1;
            }
        }
    }

    summary
}

/// Stage 3: transform the manifest at `manifest_path`
pub fn run_transform_stage(manifest_path: &Path) -> Result<TransformSummary> {
    let start_time = Instant::now();
    let manifest = load_manifest(manifest_path)?;

    let mut summary = transform_groups(&manifest);
    summary.processing_time_ms = start_time.elapsed().as_millis();

    info!(
        "Transform done. processed={} skipped={} errors={}",
        summary.processed, summary.skipped, summary.failed
    );
    Ok(summary)
}
