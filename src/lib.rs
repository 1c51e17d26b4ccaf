//! Meteo Ingest Library
//!
//! A batch pipeline that turns a declarative workload (locations, sensors,
//! date range) into monthly Parquet partitions of hourly archive weather
//! observations.
//!
//! The pipeline runs in three stages that communicate only through files:
//! - Planning expands the workload into a JSON task manifest
//! - Fetching downloads one long-format raw file per (location, date)
//! - Transforming pivots each month's raw files to wide format and upserts
//!   them into the stored monthly partition

pub mod cli;
pub mod config;
pub mod constants;
pub mod duration;
pub mod error;
pub mod models;
pub mod planner;
pub mod scraper;
pub mod storage;
pub mod transform;

pub use config::{ArchiveConfig, RetryPolicy, WorkloadConfig};
pub use error::{IngestError, Result};
pub use models::{FetchSummary, Reading, StructuredTable, Task, TaskManifest, TransformSummary};
