//! ISO 8601 style duration parsing for workload step intervals.
//!
//! Accepts an optional sign, `P`, an optional days field and an optional
//! time part (`T` followed by any of hours, minutes, seconds), for example
//! `+P1D`, `PT6H` or `+P1DT00H00M00S`. Only strictly positive durations are
//! returned so that date range expansion always advances.

use crate::error::{IngestError, Result};
use chrono::Duration;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<sign>[+-])?P(?:(?P<days>\d+)D)?(?:T(?:(?P<hours>\d+)H)?(?:(?P<minutes>\d+)M)?(?:(?P<seconds>\d+)S)?)?$")
        .expect("duration pattern is a valid regex")
});

/// Parse a duration string into a strictly positive [`Duration`]
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || IngestError::InvalidDurationFormat {
        input: input.to_string(),
    };

    let caps = DURATION_RE.captures(input.trim()).ok_or_else(invalid)?;

    let days = field(&caps, "days").ok_or_else(invalid)?;
    let hours = field(&caps, "hours").ok_or_else(invalid)?;
    let minutes = field(&caps, "minutes").ok_or_else(invalid)?;
    let seconds = field(&caps, "seconds").ok_or_else(invalid)?;

    let magnitude = Duration::try_days(days)
        .zip(Duration::try_hours(hours))
        .and_then(|(d, h)| d.checked_add(&h))
        .zip(Duration::try_minutes(minutes))
        .and_then(|(acc, m)| acc.checked_add(&m))
        .zip(Duration::try_seconds(seconds))
        .and_then(|(acc, s)| acc.checked_add(&s))
        .ok_or_else(invalid)?;

    let signed = match caps.name("sign").map(|m| m.as_str()) {
        Some("-") => -magnitude,
        _ => magnitude,
    };

    if signed <= Duration::zero() {
        return Err(IngestError::NonPositiveDuration {
            input: input.to_string(),
        });
    }
    Ok(signed)
}

/// Numeric value of an optional capture group; absent groups count as zero
fn field(caps: &Captures<'_>, name: &str) -> Option<i64> {
    match caps.name(name) {
        Some(m) => m.as_str().parse().ok(),
        None => Some(0),
    }
}
