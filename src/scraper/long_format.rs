//! Reshapes the nested archive response into long-format readings.

use crate::error::{IngestError, Result};
use crate::models::Reading;
use crate::scraper::client::ArchiveResponse;
use chrono::NaiveDateTime;

const TIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];

/// One reading per requested sensor per hourly timestamp.
///
/// A response without timestamps yields no readings. A sensor missing from
/// the response, or a series shorter than the time axis, contributes nulls.
pub fn to_long_format(
    response: &ArchiveResponse,
    location: &str,
    sensors: &[String],
) -> Result<Vec<Reading>> {
    let Some(hourly) = response.hourly.as_ref() else {
        return Ok(Vec::new());
    };
    if hourly.time.is_empty() {
        return Ok(Vec::new());
    }

    let timestamps = hourly
        .time
        .iter()
        .map(|raw| parse_time(raw, location))
        .collect::<Result<Vec<_>>>()?;

    let mut readings = Vec::with_capacity(timestamps.len() * sensors.len());
    for sensor in sensors {
        let series = hourly.series.get(sensor).and_then(|v| v.as_array());
        for (idx, &timestamp) in timestamps.iter().enumerate() {
            let value = series
                .and_then(|values| values.get(idx))
                .and_then(|v| v.as_f64());
            readings.push(Reading {
                timestamp,
                location: location.to_string(),
                sensor_name: sensor.clone(),
                value,
            });
        }
    }

    Ok(readings)
}

fn parse_time(raw: &str, location: &str) -> Result<NaiveDateTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| IngestError::MalformedResponse {
            location: location.to_string(),
            reason: format!("unparseable timestamp {:?}", raw),
        })
}
