//! Extract stage: one upstream request per city, each response kept as an
//! immutable raw artifact.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::Config;
use crate::fetch::{HttpClient, fetch_text};
use crate::retry::{Backoff, ExponentialBackoff, RetryPolicy, with_retry};

/// Outcome of fetching one city.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Saved(PathBuf),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub city: String,
    pub outcome: FetchOutcome,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Saved(_))
    }
}

pub struct Fetcher<C, B = ExponentialBackoff> {
    client: C,
    base_url: reqwest::Url,
    raw_dir: PathBuf,
    timeout: Duration,
    pause: Duration,
    policy: RetryPolicy<B>,
}

impl<C: HttpClient> Fetcher<C> {
    /// Fetcher with the configured attempts and `2^(attempt-1)` second backoff.
    pub fn new(client: C, config: &Config) -> Self {
        Self {
            client,
            base_url: config.api_base_url.clone(),
            raw_dir: config.raw_dir.clone(),
            timeout: config.timeout,
            pause: config.inter_request_pause,
            policy: RetryPolicy::new(config.max_retries, ExponentialBackoff::seconds(0)),
        }
    }
}

impl<C: HttpClient, B: Backoff> Fetcher<C, B> {
    pub fn with_policy<B2: Backoff>(self, policy: RetryPolicy<B2>) -> Fetcher<C, B2> {
        Fetcher {
            client: self.client,
            base_url: self.base_url,
            raw_dir: self.raw_dir,
            timeout: self.timeout,
            pause: self.pause,
            policy,
        }
    }

    /// Swaps the backoff and keeps the configured number of attempts.
    pub fn with_backoff<B2: Backoff>(self, backoff: B2) -> Fetcher<C, B2> {
        let max_attempts = self.policy.max_attempts;
        self.with_policy(RetryPolicy::new(max_attempts, backoff))
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Fetches every city in order. A failing city never stops the rest.
    pub async fn fetch_all(&self, cities: &[String]) -> Vec<FetchResult> {
        let mut results = Vec::with_capacity(cities.len());
        for city in cities {
            let span = info_span!("fetch_city", city = %city);
            let result = self.fetch_city(city).instrument(span).await;
            results.push(result);
            tokio::time::sleep(self.pause).await;
        }
        results
    }

    pub async fn fetch_city(&self, city: &str) -> FetchResult {
        let max_attempts = self.policy.max_attempts;
        let outcome = with_retry(&self.policy, |attempt| async move {
            info!(attempt, max_attempts, "Requesting air quality data");
            let body = fetch_text(&self.client, self.city_url(city), Some(self.timeout)).await?;
            save_raw(&self.raw_dir, city, &parse_payload(&body), Utc::now())
        })
        .await;

        match outcome {
            Ok(path) => {
                info!(path = %path.display(), "Fetched and saved");
                FetchResult {
                    city: city.to_string(),
                    outcome: FetchOutcome::Saved(path),
                }
            }
            Err(e) => {
                error!(max_attempts, error = %e, "Giving up on city");
                FetchResult {
                    city: city.to_string(),
                    outcome: FetchOutcome::Failed(format!("{e:#}")),
                }
            }
        }
    }

    /// The base URL with `city` appended to whatever query it already carries.
    fn city_url(&self, city: &str) -> reqwest::Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("city", city);
        url
    }
}

/// JSON bodies are kept as-is; anything else is wrapped as `{"raw_text": ...}`.
pub fn parse_payload(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| json!({ "raw_text": body }))
}

/// `"New Delhi"` -> `"new_delhi"`.
pub fn city_slug(city: &str) -> String {
    city.trim().replace(' ', "_").to_lowercase()
}

/// Persists `payload` as `<slug>_raw_<timestamp>.json`, or as `.txt` if the
/// JSON file cannot be written. Existing artifacts are never overwritten.
pub fn save_raw(raw_dir: &Path, city: &str, payload: &Value, now: DateTime<Utc>) -> Result<PathBuf> {
    std::fs::create_dir_all(raw_dir)
        .with_context(|| format!("creating {}", raw_dir.display()))?;

    let stem = format!("{}_raw_{}", city_slug(city), now.format("%Y%m%dT%H%M%SZ"));

    let json_result = serde_json::to_string_pretty(payload)
        .map_err(anyhow::Error::from)
        .and_then(|text| write_new(raw_dir, &stem, "json", &text));

    match json_result {
        Ok(path) => Ok(path),
        Err(e) => {
            warn!(error = %e, "JSON artifact write failed, saving text instead");
            write_new(raw_dir, &stem, "txt", &payload.to_string())
        }
    }
}

/// Creates `<stem>.<ext>`, or `<stem>-N.<ext>` when that name is taken.
fn write_new(dir: &Path, stem: &str, ext: &str, contents: &str) -> Result<PathBuf> {
    write_new_with(dir, stem, ext, |file| file.write_all(contents.as_bytes()))
}

/// A file that `write` fails on is removed again, so only complete
/// artifacts are ever left in `dir`.
fn write_new_with<W>(dir: &Path, stem: &str, ext: &str, write: W) -> Result<PathBuf>
where
    W: FnOnce(&mut File) -> std::io::Result<()>,
{
    for n in 0u32.. {
        let name = if n == 0 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem}-{n}.{ext}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let written = write(&mut file).and_then(|()| file.sync_all());
                drop(file);
                if let Err(e) = written {
                    if let Err(cleanup) = std::fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %cleanup, "Could not remove partial artifact");
                    }
                    return Err(e).with_context(|| format!("writing {}", path.display()));
                }
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
        }
    }
    unreachable!("artifact name space exhausted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::ScriptedClient;
    use chrono::TimeZone;

    fn test_config(raw_dir: &Path) -> Config {
        config_with(raw_dir, "3")
    }

    fn config_with(raw_dir: &Path, max_retries: &str) -> Config {
        let raw = raw_dir.to_string_lossy().to_string();
        let max_retries = max_retries.to_string();
        Config::from_lookup(|key| match key {
            "OPENAQ_API_BASE" => Some("https://aq.example.com/v1/air-quality?hourly=pm10".into()),
            "RAW_DIR" => Some(raw.clone()),
            "MAX_RETRIES" => Some(max_retries.clone()),
            _ => None,
        })
        .unwrap()
    }

    fn fast<C: HttpClient>(fetcher: Fetcher<C>) -> Fetcher<C, ExponentialBackoff> {
        fetcher
            .with_backoff(ExponentialBackoff {
                unit: Duration::ZERO,
                first_exponent: 0,
            })
            .with_pause(Duration::ZERO)
    }

    #[test]
    fn test_new_fetcher_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(ScriptedClient::always(200, "{}"), &config_with(dir.path(), "5"));

        assert_eq!(fetcher.policy.max_attempts, 5);
        assert_eq!(fetcher.policy.backoff.delay(1), Duration::from_secs(1));
        assert_eq!(fetcher.policy.backoff.delay(2), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_configured_max_retries_bounds_requests() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "5");
        let fetcher = fast(Fetcher::new(ScriptedClient::always(503, "busy"), &config));

        let result = fetcher.fetch_city("Delhi").await;

        assert_eq!(fetcher.client.calls(), 5);
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_always_failing_city_is_requested_max_retries_times() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let fetcher = fast(Fetcher::new(ScriptedClient::always(500, "boom"), &config));

        let result = fetcher.fetch_city("Delhi").await;

        assert_eq!(fetcher.client.calls(), config.max_retries as usize);
        assert!(!result.is_success());
        match result.outcome {
            FetchOutcome::Failed(msg) => assert!(msg.contains("500")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let client = ScriptedClient::new(vec![(502, "bad gateway"), (200, r#"{"hourly": {}}"#)]);
        let fetcher = fast(Fetcher::new(client, &config));

        let result = fetcher.fetch_city("New Delhi").await;

        assert_eq!(fetcher.client.calls(), 2);
        let FetchOutcome::Saved(path) = result.outcome else {
            panic!("expected saved artifact");
        };
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("new_delhi_raw_"));
        assert!(name.ends_with(".json"));
    }

    #[tokio::test]
    async fn test_city_is_appended_to_existing_query() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let fetcher = fast(Fetcher::new(ScriptedClient::always(200, "{}"), &config));

        fetcher.fetch_city("New Delhi").await;

        let url = &fetcher.client.requests()[0].url;
        assert_eq!(url.path(), "/v1/air-quality");
        assert_eq!(url.query(), Some("hourly=pm10&city=New+Delhi"));
    }

    #[tokio::test]
    async fn test_fetch_all_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let client = ScriptedClient::new(vec![
            (500, "x"),
            (500, "x"),
            (500, "x"),
            (200, r#"{"city": "Pune"}"#),
        ]);
        let fetcher = fast(Fetcher::new(client, &config));
        let cities = vec!["Delhi".to_string(), "Pune".to_string()];

        let results = fetcher.fetch_all(&cities).await;

        assert_eq!(results.len(), 2);
        assert!(!results[0].is_success());
        assert!(results[1].is_success());
        assert_eq!(results[1].city, "Pune");
    }

    #[tokio::test]
    async fn test_non_json_body_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let fetcher = fast(Fetcher::new(ScriptedClient::always(200, "<html>oops</html>"), &config));

        let FetchOutcome::Saved(path) = fetcher.fetch_city("Delhi").await.outcome else {
            panic!("expected saved artifact");
        };

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(saved["raw_text"], "<html>oops</html>");
    }

    #[test]
    fn test_save_raw_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

        let first = save_raw(dir.path(), "Delhi", &json!({"n": 1}), now).unwrap();
        let second = save_raw(dir.path(), "Delhi", &json!({"n": 2}), now).unwrap();

        assert_eq!(
            first.file_name().unwrap(),
            "delhi_raw_20250102T030405Z.json"
        );
        assert_eq!(
            second.file_name().unwrap(),
            "delhi_raw_20250102T030405Z-1.json"
        );
        assert!(std::fs::read_to_string(first).unwrap().contains("\"n\": 1"));
    }

    #[test]
    fn test_failed_write_leaves_no_partial_artifact() {
        let dir = tempfile::tempdir().unwrap();

        let result = write_new_with(dir.path(), "delhi_raw_20250102T030405Z", "json", |file| {
            file.write_all(b"{\"hourly\": [1, 2")?;
            Err(std::io::Error::other("file too large"))
        });

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("file too large"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // the name is free again for the next attempt
        let path = save_raw(
            dir.path(),
            "Delhi",
            &json!({"n": 1}),
            Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
        )
        .unwrap();
        assert_eq!(path.file_name().unwrap(), "delhi_raw_20250102T030405Z.json");
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload(r#"{"a": 1}"#), json!({"a": 1}));
        assert_eq!(parse_payload("nope"), json!({"raw_text": "nope"}));
    }
}
