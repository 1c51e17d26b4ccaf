//! Application constants for the ingest pipeline
//!
//! Default endpoint, coordinate table, retry bounds and the column
//! conventions shared by the raw and structured Parquet files.

// =============================================================================
// Remote Archive
// =============================================================================

/// Open-Meteo historical archive endpoint
pub const ARCHIVE_API_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

/// Timezone requested from the archive; stored timestamps are naive UTC
pub const ARCHIVE_TIMEZONE: &str = "UTC";

/// Per-request transport timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Known locations and their (latitude, longitude)
pub const LOCATION_COORDINATES: &[(&str, f64, f64)] = &[
    ("amsterdam", 52.37, 4.89),
    ("london", 51.51, -0.13),
];

// =============================================================================
// Retry Policy
// =============================================================================

/// Total attempts per request, including the first
pub const MAX_FETCH_ATTEMPTS: u32 = 3;

/// Fixed delay between attempts after a transport failure
pub const RETRY_BACKOFF_SECS: u64 = 2;

// =============================================================================
// Column Conventions
// =============================================================================

pub mod columns {
    pub const TIMESTAMP: &str = "timestamp";
    pub const LOCATION: &str = "location";
    pub const SENSOR_NAME: &str = "sensor_name";
    pub const VALUE: &str = "value";

    /// Columns every raw long-format file must carry
    pub const RAW_REQUIRED: &[&str] = &[TIMESTAMP, LOCATION, SENSOR_NAME, VALUE];

    /// Columns that lead every structured file, before the sensors
    pub const FIXED: &[&str] = &[TIMESTAMP, LOCATION];
}

/// Sensor identifiers shortened when pivoted into structured columns
pub const SENSOR_RENAMES: &[(&str, &str)] = &[("dew_point_2m", "dew_point")];

/// Placeholder substituted with the location name in path templates
pub const LOCATION_PLACEHOLDER: &str = "{location_name}";

/// Default file names next to the working directory
pub const DEFAULT_WORKLOAD_FILE: &str = "workload.json";
pub const DEFAULT_MANIFEST_FILE: &str = "tasks.json";

/// Look up the structured column name for a sensor identifier
pub fn canonical_sensor_name(sensor: &str) -> &str {
    SENSOR_RENAMES
        .iter()
        .find(|(from, _)| *from == sensor)
        .map(|(_, to)| *to)
        .unwrap_or(sensor)
}
