//! Market data sources.
//!
//! Defines the `QuoteSource` trait and the priority-ordered `SourceResolver`:
//! - Tencent (qt.gtimg.cn) — primary realtime quote feed
//! - Sina (hq.sinajs.cn) — realtime fallback
//! - Tushare (api.tushare.pro) — token-gated pro API, serves any trade date

pub mod sina;
pub mod tencent;
pub mod tushare;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{RawRecord, ScreenError, SourceFailure};

// ---------------------------------------------------------------------------
// QuoteSource trait
// ---------------------------------------------------------------------------

/// Abstraction over upstream quote feeds.
///
/// Implementors return the session record exactly as their API reports it;
/// unit normalization happens downstream. A handler that cannot serve a
/// request (no token, unsupported date) returns an ordinary error so the
/// resolver can fall through to the next handler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetch the raw session record for one instrument.
    async fn fetch(&self, instrument: &str, as_of: NaiveDate) -> Result<RawRecord>;

    /// Source name for logging, metrics, and unit profiles.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// A successful resolution: the record, where it came from, and whether a
/// higher-priority handler had to be skipped over to get it.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: RawRecord,
    pub source: String,
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Append-only observability counters for one resolver instance.
///
/// Updated with relaxed atomic increments from concurrently running
/// resolutions; never read by resolution logic itself.
#[derive(Debug)]
struct ResolverMetrics {
    attempts: Vec<(String, AtomicU64)>,
    degraded: AtomicU64,
    exhausted: AtomicU64,
}

impl ResolverMetrics {
    fn new(names: &[String]) -> Self {
        ResolverMetrics {
            attempts: names
                .iter()
                .map(|n| (n.clone(), AtomicU64::new(0)))
                .collect(),
            degraded: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
        }
    }

    fn record_attempt(&self, idx: usize) {
        if let Some((_, counter)) = self.attempts.get(idx) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self
                .attempts
                .iter()
                .map(|(n, c)| (n.clone(), c.load(Ordering::Relaxed)))
                .collect(),
            degraded: self.degraded.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the resolver counters, in priority order.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub attempts: Vec<(String, u64)>,
    pub degraded: u64,
    pub exhausted: u64,
}

impl MetricsSnapshot {
    /// Attempt count for one source; zero for sources this resolver
    /// does not hold.
    pub fn attempts_for(&self, source: &str) -> u64 {
        self.attempts
            .iter()
            .find(|(n, _)| n == source)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .attempts
            .iter()
            .map(|(n, c)| format!("{n}={c}"))
            .collect();
        write!(
            f,
            "attempts: {} | degraded={} | exhausted={}",
            parts.join(" "),
            self.degraded,
            self.exhausted,
        )
    }
}

// ---------------------------------------------------------------------------
// SourceResolver
// ---------------------------------------------------------------------------

/// Priority-ordered chain of quote sources.
///
/// Handlers are tried strictly in construction order; the first `Ok` wins
/// and later handlers are never attempted. Every failure, including a
/// timeout, is recorded and the walk continues. Per-call state is local,
/// so one resolver instance serves concurrent resolutions safely.
pub struct SourceResolver {
    handlers: Vec<Box<dyn QuoteSource>>,
    timeout: Duration,
    metrics: ResolverMetrics,
}

impl SourceResolver {
    pub fn new(handlers: Vec<Box<dyn QuoteSource>>, timeout: Duration) -> Self {
        let names: Vec<String> = handlers.iter().map(|h| h.name().to_string()).collect();
        SourceResolver {
            handlers,
            timeout,
            metrics: ResolverMetrics::new(&names),
        }
    }

    /// Resolve one instrument from the first healthy source.
    ///
    /// Returns `ScreenError::SourceExhausted` with the per-handler failure
    /// reasons, in attempt order, when the whole chain fails.
    pub async fn resolve(
        &self,
        instrument: &str,
        as_of: NaiveDate,
    ) -> Result<Resolution, ScreenError> {
        let mut failures: Vec<SourceFailure> = Vec::new();

        for (idx, handler) in self.handlers.iter().enumerate() {
            self.metrics.record_attempt(idx);
            match tokio::time::timeout(self.timeout, handler.fetch(instrument, as_of)).await {
                Ok(Ok(record)) => {
                    let degraded = !failures.is_empty();
                    if degraded {
                        self.metrics.record_degraded();
                        warn!(
                            instrument,
                            source = handler.name(),
                            skipped = failures.len(),
                            "Resolved from fallback source"
                        );
                    } else {
                        debug!(instrument, source = handler.name(), "Resolved");
                    }
                    return Ok(Resolution {
                        record,
                        source: handler.name().to_string(),
                        degraded,
                    });
                }
                Ok(Err(e)) => {
                    debug!(
                        instrument,
                        source = handler.name(),
                        error = %e,
                        "Source failed, trying next"
                    );
                    failures.push(SourceFailure {
                        source: handler.name().to_string(),
                        reason: format!("{e:#}"),
                    });
                }
                Err(_) => {
                    debug!(
                        instrument,
                        source = handler.name(),
                        timeout_secs = self.timeout.as_secs(),
                        "Source timed out, trying next"
                    );
                    failures.push(SourceFailure {
                        source: handler.name().to_string(),
                        reason: format!("timed out after {}s", self.timeout.as_secs()),
                    });
                }
            }
        }

        self.metrics.record_exhausted();
        warn!(instrument, attempts = failures.len(), "All sources exhausted");
        Err(ScreenError::SourceExhausted {
            instrument: instrument.to_string(),
            failures,
        })
    }

    /// Counter snapshot for logging and diagnostics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Handler names in priority order.
    pub fn source_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
