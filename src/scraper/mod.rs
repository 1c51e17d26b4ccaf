//! Fetch stage: downloads one day of readings per task.
//!
//! A task whose raw file already exists is skipped without touching the
//! network, which makes the stage safe to re-run after a partial failure.
//! Per-task errors are logged with location and date, counted, and never
//! abort the remaining tasks.

pub mod client;
pub mod long_format;

use self::client::{ArchiveClient, ArchiveRequest, ArchiveResponse, HttpArchiveClient, RequestError};
use self::long_format::to_long_format;

use crate::config::ArchiveConfig;
use crate::error::{IngestError, Result};
use crate::models::{FailedTask, FetchSummary, Task, TaskManifest};
use crate::planner::load_manifest;
use crate::storage::write_raw;

use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Result of fetching a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The raw file already existed; nothing was requested
    Skipped,
    /// A raw file with this many readings was written
    Written { rows: usize },
}

/// Fetches tasks through an injected archive client
#[derive(Debug)]
pub struct Fetcher<C> {
    client: C,
    config: ArchiveConfig,
}

impl<C: ArchiveClient> Fetcher<C> {
    pub fn new(client: C, config: ArchiveConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch one task and persist its readings at the task's raw path
    pub async fn fetch(&self, task: &Task, sensors: &[String]) -> Result<FetchOutcome> {
        if task.raw_path.exists() {
            debug!("Skip existing file: {}", task.raw_path.display());
            return Ok(FetchOutcome::Skipped);
        }

        let coordinates = self.config.coordinates_for(&task.location).ok_or_else(|| {
            IngestError::UnknownLocation {
                location: task.location.clone(),
            }
        })?;

        let request = ArchiveRequest {
            coordinates,
            date: task.date,
            sensors: sensors.to_vec(),
        };
        let response = self.request_with_retry(task, &request).await?;
        let readings = to_long_format(&response, &task.location, sensors)?;

        // An empty result is still written so the unit counts as done
        write_raw(&readings, &task.raw_path)?;
        Ok(FetchOutcome::Written {
            rows: readings.len(),
        })
    }

    async fn request_with_retry(
        &self,
        task: &Task,
        request: &ArchiveRequest,
    ) -> Result<ArchiveResponse> {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            match self.client.fetch_day(request).await {
                Ok(response) => return Ok(response),
                Err(RequestError::Status { status, message }) => {
                    debug!("Definitive HTTP error: {}", message);
                    return Err(IngestError::DefinitiveRequestError {
                        location: task.location.clone(),
                        date: task.date,
                        status,
                    });
                }
                Err(RequestError::Transport(message)) => {
                    warn!(
                        "Attempt {}/{} for {} {} failed: {}",
                        attempt, max_attempts, task.location, task.date, message
                    );
                    last_failure = message;
                    if attempt < max_attempts {
                        tokio::time::sleep(policy.backoff).await;
                    }
                }
            }
        }

        Err(IngestError::TransportFailure {
            location: task.location.clone(),
            date: task.date,
            attempts: max_attempts,
            message: last_failure,
        })
    }
}

/// Run every task of a manifest in order, isolating per-task failures
pub async fn fetch_all<C: ArchiveClient>(
    fetcher: &Fetcher<C>,
    manifest: &TaskManifest,
    progress_bar: Option<&ProgressBar>,
) -> FetchSummary {
    let mut summary = FetchSummary::default();

    for task in &manifest.tasks {
        if let Some(pb) = progress_bar {
            pb.set_message(format!("{} {}", task.location, task.date));
        }

        // An existing raw file completes the task before any lookup
        let result = if task.raw_path.exists() {
            debug!("Skip existing file: {}", task.raw_path.display());
            Ok(FetchOutcome::Skipped)
        } else {
            match manifest.sensors_for(&task.location) {
                Some(sensors) => fetcher.fetch(task, sensors).await,
                None => Err(IngestError::UnknownLocation {
                    location: task.location.clone(),
                }),
            }
        };

        match result {
            Ok(FetchOutcome::Skipped) => summary.skipped += 1,
            Ok(FetchOutcome::Written { rows }) => {
                summary.written += 1;
                info!("Wrote {} ({} rows)", task.raw_path.display(), rows);
            }
            Err(e) => {
                error!("Failed for {} {}: {}", task.location, task.date, e);
                summary.failed += 1;
                summary.failed_tasks.push(FailedTask {
                    location: task.location.clone(),
                    date: task.date,
                    reason: e.to_string(),
                });
            }
        }

        if let Some(pb) = progress_bar {
            pb.inc(1);
        }
    }

    summary
}

/// Stage 2: fetch every task of the manifest at `manifest_path`
pub async fn run_fetch_stage(manifest_path: &Path, config: ArchiveConfig) -> Result<FetchSummary> {
    let start_time = Instant::now();
    let manifest = load_manifest(manifest_path)?;
    let fetcher = Fetcher::new(HttpArchiveClient::new(&config)?, config);

    let pb = ProgressBar::new(manifest.tasks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut summary = fetch_all(&fetcher, &manifest, Some(&pb)).await;
    pb.finish_with_message("Fetch complete");

    summary.processing_time_ms = start_time.elapsed().as_millis();
    info!(
        "Fetch done. wrote={} skipped={} errors={} errored={:?}",
        summary.written,
        summary.skipped,
        summary.failed,
        summary.failed_dates()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DateConfig, LocalStorage, Location, RetryPolicy};
    use crate::storage::read_raw;
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Replays scripted results and counts calls
    struct ScriptedClient {
        script: Mutex<VecDeque<std::result::Result<ArchiveResponse, RequestError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(script: Vec<std::result::Result<ArchiveResponse, RequestError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ArchiveClient for ScriptedClient {
        async fn fetch_day(
            &self,
            _request: &ArchiveRequest,
        ) -> std::result::Result<ArchiveResponse, RequestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RequestError::Transport("script exhausted".into())))
        }
    }

    fn day_response() -> ArchiveResponse {
        serde_json::from_str(
            r#"{"hourly": {"time": ["2024-01-01T00:00", "2024-01-01T01:00"], "temperature_2m": [1.5, 2.5]}}"#,
        )
        .unwrap()
    }

    fn fast_config() -> ArchiveConfig {
        ArchiveConfig::default().with_retry(RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
        })
    }

    fn task(temp_dir: &TempDir, location: &str, day: u32) -> Task {
        Task {
            location: location.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            raw_path: temp_dir
                .path()
                .join("raw")
                .join(location)
                .join(format!("202401{:02}.parquet", day)),
            structured_path: temp_dir.path().join("structured").join("202401.parquet"),
        }
    }

    fn sensors() -> Vec<String> {
        vec!["temperature_2m".to_string()]
    }

    #[tokio::test]
    async fn test_fetch_writes_raw_file() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(ScriptedClient::new(vec![Ok(day_response())]), fast_config());
        let task = task(&temp_dir, "amsterdam", 1);

        let outcome = fetcher.fetch(&task, &sensors()).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Written { rows: 2 });
        assert_eq!(read_raw(&task.raw_path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_raw_file_skips_network() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(
            ScriptedClient::new(vec![Ok(day_response()), Ok(day_response())]),
            fast_config(),
        );
        let task = task(&temp_dir, "amsterdam", 1);

        fetcher.fetch(&task, &sensors()).await.unwrap();
        let before = std::fs::read(&task.raw_path).unwrap();

        let outcome = fetcher.fetch(&task, &sensors()).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Skipped);
        assert_eq!(fetcher.client.calls(), 1);
        assert_eq!(std::fs::read(&task.raw_path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_empty_response_still_marks_task_done() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(
            ScriptedClient::new(vec![Ok(ArchiveResponse::default())]),
            fast_config(),
        );
        let task = task(&temp_dir, "london", 2);

        let outcome = fetcher.fetch(&task, &sensors()).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Written { rows: 0 });
        assert!(task.raw_path.exists());
        assert_eq!(
            fetcher.fetch(&task, &sensors()).await.unwrap(),
            FetchOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_unknown_location_fails_without_request() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(ScriptedClient::new(vec![]), fast_config());
        let task = task(&temp_dir, "atlantis", 1);

        let result = fetcher.fetch(&task, &sensors()).await;

        assert!(matches!(result, Err(IngestError::UnknownLocation { .. })));
        assert_eq!(fetcher.client.calls(), 0);
        assert!(!task.raw_path.exists());
    }

    #[tokio::test]
    async fn test_transport_failure_retries_then_succeeds() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(
            ScriptedClient::new(vec![
                Err(RequestError::Transport("connection reset".into())),
                Ok(day_response()),
            ]),
            fast_config(),
        );
        let task = task(&temp_dir, "amsterdam", 3);

        let outcome = fetcher.fetch(&task, &sensors()).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Written { rows: 2 });
        assert_eq!(fetcher.client.calls(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_exhausts_attempts() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(
            ScriptedClient::new(vec![
                Err(RequestError::Transport("timeout 1".into())),
                Err(RequestError::Transport("timeout 2".into())),
                Err(RequestError::Transport("timeout 3".into())),
                Ok(day_response()),
            ]),
            fast_config(),
        );
        let task = task(&temp_dir, "amsterdam", 4);

        match fetcher.fetch(&task, &sensors()).await {
            Err(IngestError::TransportFailure {
                attempts, message, ..
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(message, "timeout 3");
            }
            other => panic!("Expected TransportFailure, got {:?}", other),
        }
        assert_eq!(fetcher.client.calls(), 3);
        assert!(!task.raw_path.exists());
    }

    #[tokio::test]
    async fn test_http_error_is_not_retried() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(
            ScriptedClient::new(vec![
                Err(RequestError::Status {
                    status: 400,
                    message: "bad request".into(),
                }),
                Ok(day_response()),
            ]),
            fast_config(),
        );
        let task = task(&temp_dir, "amsterdam", 5);

        let result = fetcher.fetch(&task, &sensors()).await;

        assert!(matches!(
            result,
            Err(IngestError::DefinitiveRequestError { status: 400, .. })
        ));
        assert_eq!(fetcher.client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let temp_dir = TempDir::new().unwrap();
        let config = ArchiveConfig::default();
        let fetcher = Fetcher::new(
            ScriptedClient::new(vec![
                Err(RequestError::Transport("down".into())),
                Err(RequestError::Transport("down".into())),
                Err(RequestError::Transport("down".into())),
            ]),
            config,
        );
        let task = task(&temp_dir, "london", 6);

        let started = tokio::time::Instant::now();
        let result = fetcher.fetch(&task, &sensors()).await;

        assert!(result.is_err());
        // Two sleeps of the default 2s backoff; none after the final attempt
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(6), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn test_fetch_all_isolates_failures() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = TaskManifest {
            date_config: DateConfig {
                begin_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                time_increment: "+P1D".into(),
            },
            locations: vec![
                Location {
                    name: "amsterdam".into(),
                    sensors: sensors(),
                },
                Location {
                    name: "atlantis".into(),
                    sensors: sensors(),
                },
            ],
            local_storage: LocalStorage {
                raw_output_dir: "unused".into(),
                structured_output_dir: "unused".into(),
            },
            tasks: vec![
                task(&temp_dir, "amsterdam", 1),
                task(&temp_dir, "atlantis", 1),
                task(&temp_dir, "amsterdam", 2),
                task(&temp_dir, "amsterdam", 3),
            ],
        };
        std::fs::create_dir_all(manifest.tasks[3].raw_path.parent().unwrap()).unwrap();
        write_raw(&[], &manifest.tasks[3].raw_path).unwrap();

        let fetcher = Fetcher::new(
            ScriptedClient::new(vec![
                Ok(day_response()),
                Err(RequestError::Status {
                    status: 404,
                    message: "not found".into(),
                }),
            ]),
            fast_config(),
        );

        let summary = fetch_all(&fetcher, &manifest, Some(&ProgressBar::hidden())).await;

        assert_eq!(summary.written, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(
            summary.failed_dates(),
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
            ]
        );
        assert_eq!(summary.failed_tasks[0].location, "atlantis");
    }

    #[tokio::test]
    async fn test_existing_raw_file_skips_before_sensor_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = TaskManifest {
            date_config: DateConfig {
                begin_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                time_increment: "+P1D".into(),
            },
            locations: vec![],
            local_storage: LocalStorage {
                raw_output_dir: "unused".into(),
                structured_output_dir: "unused".into(),
            },
            tasks: vec![task(&temp_dir, "amsterdam", 1)],
        };
        write_raw(&[], &manifest.tasks[0].raw_path).unwrap();

        let fetcher = Fetcher::new(ScriptedClient::new(vec![]), fast_config());
        let summary = fetch_all(&fetcher, &manifest, None).await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(fetcher.client().calls(), 0);
    }

    /// Accepts one connection, answers it with `status_line` and hangs up
    fn serve_once(listener: &std::net::TcpListener, status_line: &'static str) -> std::thread::JoinHandle<()> {
        use std::io::{Read, Write};

        let listener = listener.try_clone().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status_line
            );
            stream.write_all(response.as_bytes()).unwrap();
        })
    }

    fn http_fetcher(endpoint: String) -> Fetcher<HttpArchiveClient> {
        let config = fast_config().with_endpoint(endpoint).with_timeout_secs(5);
        Fetcher::new(HttpArchiveClient::new(&config).unwrap(), config)
    }

    #[tokio::test]
    async fn test_http_error_status_is_not_retried() {
        let temp_dir = TempDir::new().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve_once(&listener, "500 Internal Server Error");

        let fetcher = http_fetcher(format!("http://{}/v1/archive", addr));
        let task = task(&temp_dir, "amsterdam", 1);
        let result = fetcher.fetch(&task, &sensors()).await;
        server.join().unwrap();

        assert!(matches!(
            result,
            Err(IngestError::DefinitiveRequestError { status: 500, .. })
        ));
        assert!(!task.raw_path.exists());

        // No second connection is waiting
        listener.set_nonblocking(true).unwrap();
        let next = listener.accept();
        assert!(
            matches!(&next, Err(e) if e.kind() == std::io::ErrorKind::WouldBlock),
            "{:?}",
            next
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried_to_the_bound() {
        let temp_dir = TempDir::new().unwrap();
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let fetcher = http_fetcher(format!("http://{}/v1/archive", addr));
        let task = task(&temp_dir, "amsterdam", 1);
        let result = fetcher.fetch(&task, &sensors()).await;

        assert!(matches!(
            result,
            Err(IngestError::TransportFailure { attempts: 3, .. })
        ));
        assert!(!task.raw_path.exists());
    }
}
