//! Remote archive access.
//!
//! [`ArchiveClient`] is the seam between the fetch stage and the network.
//! [`HttpArchiveClient`] talks to the Open-Meteo archive; tests substitute a
//! scripted client.

use crate::config::{ArchiveConfig, Coordinates};
use crate::constants::ARCHIVE_TIMEZONE;
use crate::error::{IngestError, Result};
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Parameters of a single-day, single-location request
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRequest {
    pub coordinates: Coordinates,
    pub date: NaiveDate,
    pub sensors: Vec<String>,
}

impl ArchiveRequest {
    /// Query string pairs; start and end date are both the target day
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let day = self.date.format("%Y-%m-%d").to_string();
        vec![
            ("latitude", self.coordinates.latitude.to_string()),
            ("longitude", self.coordinates.longitude.to_string()),
            ("start_date", day.clone()),
            ("end_date", day),
            ("hourly", self.sensors.join(",")),
            ("timezone", ARCHIVE_TIMEZONE.to_string()),
        ]
    }
}

/// Archive payload; only the hourly block is used
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchiveResponse {
    #[serde(default)]
    pub hourly: Option<HourlyBlock>,
}

/// Parallel arrays keyed by sensor, sharing one `time` array
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HourlyBlock {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(flatten)]
    pub series: BTreeMap<String, serde_json::Value>,
}

/// Failure of one request attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// Connection, timeout or decoding problem; worth retrying
    #[error("transport failure: {0}")]
    Transport(String),

    /// The archive answered with an error status; retrying will not help
    #[error("HTTP status {status}: {message}")]
    Status { status: u16, message: String },
}

/// Fetches one day of hourly data for one location
pub trait ArchiveClient {
    fn fetch_day(
        &self,
        request: &ArchiveRequest,
    ) -> impl Future<Output = std::result::Result<ArchiveResponse, RequestError>> + Send;
}

/// reqwest-backed client for the Open-Meteo archive
#[derive(Debug, Clone)]
pub struct HttpArchiveClient {
    client: Client,
    endpoint: String,
}

impl HttpArchiveClient {
    /// Build a client with the configured endpoint and per-request timeout
    pub fn new(config: &ArchiveConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IngestError::config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

impl ArchiveClient for HttpArchiveClient {
    async fn fetch_day(
        &self,
        request: &ArchiveRequest,
    ) -> std::result::Result<ArchiveResponse, RequestError> {
        debug!("GET {} for {}", self.endpoint, request.date);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&request.query_params())
            .send()
            .await
            .map_err(|e| RequestError::Transport(e.to_string()))?;

        let response = response.error_for_status().map_err(|e| match e.status() {
            Some(status) => RequestError::Status {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => RequestError::Transport(e.to_string()),
        })?;

        response
            .json::<ArchiveResponse>()
            .await
            .map_err(|e| RequestError::Transport(e.to_string()))
    }
}
