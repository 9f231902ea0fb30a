//! Load stage: scored records into the remote table, in retried batches.

use tracing::{Instrument, error, info, info_span};

use crate::config::{Config, TABLE_NAME};
use crate::record::{Record, StoredRecord};
use crate::retry::{Backoff, ExponentialBackoff, RetryPolicy, with_retry};
use crate::services::table_store::TableStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertionReport {
    pub inserted: usize,
    pub total: usize,
    /// Start index of every batch that exhausted its retries.
    pub failed_batches: Vec<usize>,
}

pub struct Loader<S, B = ExponentialBackoff> {
    store: S,
    table: String,
    batch_size: usize,
    policy: RetryPolicy<B>,
}

impl<S: TableStore> Loader<S> {
    /// Loader with `load_max_retries` retries per batch and `2^attempt` second backoff.
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            store,
            table: TABLE_NAME.to_string(),
            batch_size: config.batch_size,
            policy: RetryPolicy::new(config.load_max_retries + 1, ExponentialBackoff::seconds(1)),
        }
    }
}

impl<S: TableStore, B: Backoff> Loader<S, B> {
    pub fn with_policy<B2: Backoff>(self, policy: RetryPolicy<B2>) -> Loader<S, B2> {
        Loader {
            store: self.store,
            table: self.table,
            batch_size: self.batch_size,
            policy,
        }
    }

    /// Swaps the backoff and keeps the configured number of attempts.
    pub fn with_backoff<B2: Backoff>(self, backoff: B2) -> Loader<S, B2> {
        let max_attempts = self.policy.max_attempts;
        self.with_policy(RetryPolicy::new(max_attempts, backoff))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Inserts `records` batch by batch. A batch that keeps failing is
    /// skipped; later batches are still attempted.
    pub async fn load(&self, records: &[Record]) -> InsertionReport {
        let mut report = InsertionReport {
            total: records.len(),
            ..Default::default()
        };
        info!(total = records.len(), table = %self.table, "Loading records");

        for (index, chunk) in records.chunks(self.batch_size.max(1)).enumerate() {
            let start = index * self.batch_size.max(1);
            let rows: Vec<StoredRecord> = chunk.iter().map(StoredRecord::from).collect();

            let span = info_span!("insert_batch", batch_start = start, rows = rows.len());
            let result = with_retry(&self.policy, |_| self.store.insert(&self.table, &rows))
                .instrument(span)
                .await;

            match result {
                Ok(()) => report.inserted += rows.len(),
                Err(e) => {
                    error!(batch_start = start, rows = rows.len(), error = %e, "Batch insert failed");
                    report.failed_batches.push(start);
                }
            }
        }

        info!(
            inserted = report.inserted,
            total = report.total,
            "Finished loading"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::parse_timestamp;
    use crate::services::table_store::StoreError;
    use crate::transform::scoring;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records batch sizes; fails every insert whose first row's city is in `failing`.
    #[derive(Default)]
    struct MemoryStore {
        batches: Mutex<Vec<Vec<StoredRecord>>>,
        attempts: Mutex<usize>,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl TableStore for MemoryStore {
        async fn insert(&self, _table: &str, rows: &[StoredRecord]) -> Result<(), StoreError> {
            *self.attempts.lock().unwrap() += 1;
            if rows.first().is_some_and(|r| self.failing.contains(&r.city)) {
                return Err(StoreError::Http {
                    status: 500,
                    body: "nope".to_string(),
                });
            }
            self.batches.lock().unwrap().push(rows.to_vec());
            Ok(())
        }

        async fn select_all(&self, _table: &str) -> Result<Vec<StoredRecord>, StoreError> {
            Ok(self.batches.lock().unwrap().concat())
        }
    }

    fn config(batch_size: usize) -> Config {
        config_with(batch_size, None)
    }

    fn config_with(batch_size: usize, load_max_retries: Option<&str>) -> Config {
        let load_max_retries = load_max_retries.map(str::to_string);
        Config::from_lookup(|key| match key {
            "BATCH_SIZE" => Some(batch_size.to_string()),
            "LOAD_MAX_RETRIES" => load_max_retries.clone(),
            _ => None,
        })
        .unwrap()
    }

    fn records(city: &str, n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut r = Record {
                    city: city.to_string(),
                    time: parse_timestamp("2025-01-01T00:00"),
                    pm10: Some(i as f64),
                    pm2_5: Some(10.0),
                    carbon_monoxide: None,
                    nitrogen_dioxide: None,
                    sulphur_dioxide: None,
                    ozone: None,
                    uv_index: None,
                    aqi: None,
                    severity: None,
                    risk: None,
                    hour: Some(0),
                };
                scoring::score(&mut r);
                r
            })
            .collect()
    }

    fn instant(loader: Loader<MemoryStore>) -> Loader<MemoryStore, ExponentialBackoff> {
        loader.with_backoff(ExponentialBackoff {
            unit: Duration::ZERO,
            first_exponent: 1,
        })
    }

    fn failing_pune() -> MemoryStore {
        MemoryStore {
            failing: HashSet::from(["Pune".to_string()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_loader_follows_config() {
        let loader = Loader::new(MemoryStore::default(), &config_with(200, Some("4")));

        assert_eq!(loader.policy.max_attempts, 5);
        assert_eq!(loader.policy.backoff.delay(1), Duration::from_secs(2));
        assert_eq!(loader.policy.backoff.delay(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_configured_load_retries_bound_attempts() {
        let loader = instant(Loader::new(failing_pune(), &config_with(200, Some("1"))));

        let report = loader.load(&records("Pune", 3)).await;

        assert_eq!(report.failed_batches, vec![0]);
        // first attempt plus one retry
        assert_eq!(*loader.store().attempts.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_450_rows_in_batches_of_200() {
        let loader = instant(Loader::new(MemoryStore::default(), &config(200)));

        let report = loader.load(&records("Delhi", 450)).await;

        let sizes: Vec<usize> = loader
            .store()
            .batches
            .lock()
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![200, 200, 50]);
        assert_eq!(*loader.store().attempts.lock().unwrap(), 3);
        assert_eq!(report.inserted, 450);
        assert_eq!(report.total, 450);
        assert!(report.failed_batches.is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_is_skipped_after_retries() {
        let loader = instant(Loader::new(failing_pune(), &config(2)));
        let mut rows = records("Delhi", 2);
        rows.extend(records("Pune", 2));
        rows.extend(records("Goa", 1));

        let report = loader.load(&rows).await;

        assert_eq!(report.inserted, 3);
        assert_eq!(report.total, 5);
        assert_eq!(report.failed_batches, vec![2]);
        // Delhi once, Pune 1 + 2 default retries, Goa once
        assert_eq!(*loader.store().attempts.lock().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_rows_use_remote_column_names() {
        let loader = instant(Loader::new(MemoryStore::default(), &config(200)));

        loader.load(&records("Delhi", 1)).await;

        let stored = loader.store().select_all(TABLE_NAME).await.unwrap();
        assert_eq!(stored[0].severity_score, Some(50.0));
        assert!(stored[0].risk_flag.is_some());
    }

    #[tokio::test]
    async fn test_empty_input_inserts_nothing() {
        let loader = instant(Loader::new(MemoryStore::default(), &config(200)));
        let report = loader.load(&[]).await;
        assert_eq!(report, InsertionReport::default());
        assert_eq!(*loader.store().attempts.lock().unwrap(), 0);
    }
}
