//! Task planning: expands a workload into per-(location, date) tasks.
//!
//! Planning is a pure function of the workload. Output order is locations in
//! configuration order, then dates ascending, so the manifest and every
//! downstream grouping are reproducible.

use crate::config::WorkloadConfig;
use crate::constants::LOCATION_PLACEHOLDER;
use crate::error::{IngestError, Result};
use crate::models::{Task, TaskManifest};
use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Inclusive date sequence from `begin` to `end`, advancing by `step`.
///
/// Each step is applied to midnight of the current date and truncated back
/// to a calendar date. A step shorter than a day still advances one day.
pub fn build_date_range(begin: NaiveDate, end: NaiveDate, step: Duration) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = begin;

    while current <= end {
        dates.push(current);

        let stepped = current
            .and_time(NaiveTime::MIN)
            .checked_add_signed(step)
            .map(|dt| dt.date());
        current = match stepped {
            Some(next) if next > current => next,
            Some(_) => match current.succ_opt() {
                Some(next) => next,
                None => break,
            },
            None => break,
        };
    }

    dates
}

/// Render a path template for a location and date.
///
/// `{location_name}` is replaced first, then strftime tokens such as `%Y`,
/// `%m` and `%d` are filled from the date.
pub fn materialize_path(template: &str, location: &str, date: NaiveDate) -> Result<PathBuf> {
    let escaped = location.replace('%', "%%");
    let templated = template.replace(LOCATION_PLACEHOLDER, &escaped);

    let mut rendered = String::with_capacity(templated.len() + 8);
    write!(
        rendered,
        "{}",
        date.and_time(NaiveTime::MIN).format(&templated)
    )
    .map_err(|_| {
        IngestError::config(format!("invalid date format in path template {:?}", template))
    })?;

    Ok(PathBuf::from(rendered))
}

/// First calendar day of the month containing `date`
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Expand a validated workload into its ordered task list
pub fn plan(config: &WorkloadConfig) -> Result<Vec<Task>> {
    let step = config.step()?;
    let dates = build_date_range(
        config.date_config.begin_date,
        config.date_config.end_date,
        step,
    );
    let storage = &config.local_storage;

    let mut tasks = Vec::with_capacity(dates.len() * config.locations.len());
    for location in &config.locations {
        for &date in &dates {
            tasks.push(Task {
                location: location.name.clone(),
                date,
                raw_path: materialize_path(&storage.raw_output_dir, &location.name, date)?,
                structured_path: materialize_path(
                    &storage.structured_output_dir,
                    &location.name,
                    month_start(date),
                )?,
            });
        }
    }

    debug!(
        "Planned {} dates x {} locations = {} tasks",
        dates.len(),
        config.locations.len(),
        tasks.len()
    );
    Ok(tasks)
}

/// Plan a workload and bundle it with the echoed configuration
pub fn build_manifest(config: &WorkloadConfig) -> Result<TaskManifest> {
    Ok(TaskManifest {
        date_config: config.date_config.clone(),
        locations: config.locations.clone(),
        local_storage: config.local_storage.clone(),
        tasks: plan(config)?,
    })
}

/// Persist a manifest as pretty-printed JSON
pub fn write_manifest(manifest: &TaskManifest, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Load a manifest written by [`write_manifest`]
pub fn load_manifest(path: &Path) -> Result<TaskManifest> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Stage 1: load the workload, plan it and write the manifest
pub fn run_plan_stage(config_path: &Path, manifest_path: &Path) -> Result<TaskManifest> {
    let config = WorkloadConfig::load(config_path)?;
    let manifest = build_manifest(&config)?;
    write_manifest(&manifest, manifest_path)?;

    info!(
        "Generated {} tasks across {} locations into {}",
        manifest.tasks.len(),
        manifest.locations.len(),
        manifest_path.display()
    );
    Ok(manifest)
}
