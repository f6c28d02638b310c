//! Mock quote source for integration testing.
//!
//! Provides a deterministic `QuoteSource` implementation that serves
//! scripted records, fails on demand, and tracks fetch calls — all
//! in-memory with no external dependencies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spotlight::sources::QuoteSource;
use spotlight::types::RawRecord;

/// A mock quote source with scripted per-instrument records.
///
/// State handles are shared: grab a [`MockController`] before boxing the
/// source into a resolver chain to keep control from test code.
pub struct MockSource {
    name: String,
    records: HashMap<String, RawRecord>,
    force_error: Arc<Mutex<Option<String>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

/// Cloned state handles for a [`MockSource`] that has been moved into a
/// resolver.
#[derive(Clone)]
pub struct MockController {
    force_error: Arc<Mutex<Option<String>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockSource {
    /// Create a mock serving the default instrument set.
    pub fn new(name: &str) -> Self {
        Self::with_records(name, default_records(name))
    }

    /// Create a mock serving only the given records.
    pub fn with_records(name: &str, records: Vec<RawRecord>) -> Self {
        Self {
            name: name.to_string(),
            records: records
                .into_iter()
                .map(|r| (r.instrument.clone(), r))
                .collect(),
            force_error: Arc::new(Mutex::new(None)),
            delay: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn controller(&self) -> MockController {
        MockController {
            force_error: Arc::clone(&self.force_error),
            delay: Arc::clone(&self.delay),
            calls: Arc::clone(&self.calls),
        }
    }
}

impl MockController {
    /// Force all subsequent fetches to return this error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Stall every fetch for this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Instruments fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl QuoteSource for MockSource {
    async fn fetch(&self, instrument: &str, _as_of: NaiveDate) -> Result<RawRecord> {
        self.calls.lock().unwrap().push(instrument.to_string());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let forced = self.force_error.lock().unwrap().clone();
        if let Some(msg) = forced {
            return Err(anyhow!(msg));
        }

        self.records
            .get(instrument)
            .cloned()
            .ok_or_else(|| anyhow!("No record for {instrument}"))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build one scripted record. Unknown source names sanitize under the
/// raw-shares profile, so volumes here are plain share counts.
pub fn record(
    instrument: &str,
    source: &str,
    price: f64,
    pre_close: f64,
    volume: f64,
    float_shares: f64,
    avg_volume: f64,
) -> RawRecord {
    RawRecord {
        instrument: instrument.to_string(),
        source: source.to_string(),
        fetched_at: Utc::now(),
        price: Some(price),
        pre_close: Some(pre_close),
        open: Some(pre_close * 1.01),
        high: Some(price * 1.02),
        low: Some(pre_close * 0.99),
        volume: Some(volume),
        amount: Some(volume * price),
        float_shares: Some(float_shares),
        avg_volume_5d: Some(avg_volume),
    }
}

/// A default instrument set spanning every gateway outcome, with known
/// turnover rates and volume ratios for deterministic assertions.
pub fn default_records(source: &str) -> Vec<RawRecord> {
    vec![
        // 10% turnover, 2.0x volume: admitted, in the sweet spot.
        record("600519", source, 10.0, 9.5, 10_000_000.0, 100_000_000.0, 5_000_000.0),
        // 20% turnover, 1.5x volume: admitted.
        record("000858", source, 55.0, 52.0, 20_000_000.0, 100_000_000.0, 13_333_333.0),
        // 75% turnover: the death circuit breaker fires.
        record("300750", source, 30.0, 28.0, 75_000_000.0, 100_000_000.0, 40_000_000.0),
        // 10% turnover but 0.5x volume: fails the volume-ratio screen.
        record("601012", source, 18.0, 18.2, 10_000_000.0, 100_000_000.0, 20_000_000.0),
        // 3% turnover: under the admission band.
        record("002594", source, 240.0, 238.0, 3_000_000.0, 100_000_000.0, 1_500_000.0),
    ]
}
