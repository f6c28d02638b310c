//! Tencent realtime quote feed.
//!
//! Primary source for session snapshots. Two requests per fetch:
//! - `qt.gtimg.cn/q=<symbol>` — tilde-separated realtime quote string
//! - `web.ifzq.gtimg.cn/.../kline` — recent day bars for the trailing
//!   average volume
//!
//! Units as reported by the feed: volume in lots of 100 shares, amount in
//! units of 10,000 yuan, float market cap in units of 100M yuan (from which
//! a raw float share count is derived). The record keeps the feed's units;
//! normalization is the sanitizer's job. Replies are GBK-encoded; only the
//! ASCII numeric fields are consumed.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::QuoteSource;
use crate::types::RawRecord;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const QUOTE_URL: &str = "http://qt.gtimg.cn/q=";
const KLINE_URL: &str = "http://web.ifzq.gtimg.cn/appstock/app/kline/kline";
const SOURCE_NAME: &str = "tencent";

/// Trailing days averaged for the volume baseline.
const AVG_LOOKBACK_DAYS: usize = 5;

/// Day bars requested per kline call (lookback + the current session).
const KLINE_FETCH_BARS: usize = AVG_LOOKBACK_DAYS + 1;

/// Minimum tilde-separated fields in a usable quote line. The feed emits
/// 50+; anything shorter is an error page or an unknown-symbol reply.
const MIN_QUOTE_FIELDS: usize = 45;

// Field positions in the quote line.
const F_PRICE: usize = 3;
const F_PRE_CLOSE: usize = 4;
const F_OPEN: usize = 5;
const F_VOLUME_LOTS: usize = 6;
const F_HIGH: usize = 33;
const F_LOW: usize = 34;
const F_AMOUNT_WAN: usize = 37;
const F_FLOAT_CAP_YI: usize = 44;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

/// Parsed realtime quote, fields in the feed's own units.
#[derive(Debug, Default)]
struct TencentQuote {
    price: Option<f64>,
    pre_close: Option<f64>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    volume_lots: Option<f64>,
    amount_wan: Option<f64>,
    float_cap_yi: Option<f64>,
}

/// Kline response: `data` is keyed by symbol, bars are heterogeneous
/// arrays (strings and numbers mixed).
#[derive(Debug, Deserialize)]
struct TencentKlineResponse {
    code: i64,
    #[serde(default)]
    data: HashMap<String, TencentKlineSeries>,
}

#[derive(Debug, Deserialize, Default)]
struct TencentKlineSeries {
    #[serde(default)]
    day: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    qfqday: Vec<Vec<serde_json::Value>>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Tencent quote feed client.
pub struct TencentSource {
    http: Client,
}

impl TencentSource {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("SPOTLIGHT/0.1.0 (a-share-screener)")
            .build()
            .context("Failed to build HTTP client for Tencent")?;

        Ok(Self { http })
    }

    // -- Internal helpers ------------------------------------------------

    async fn fetch_quote(&self, symbol: &str) -> Result<TencentQuote> {
        let url = format!("{QUOTE_URL}{}", urlencoding::encode(symbol));
        debug!(url = %url, "Fetching Tencent quote");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Tencent quote request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("Tencent quote error {status}");
        }

        let body = resp
            .text()
            .await
            .context("Failed to read Tencent quote body")?;
        parse_quote(&body)
    }

    async fn fetch_day_bars(&self, symbol: &str) -> Result<Vec<Vec<serde_json::Value>>> {
        let url = format!(
            "{KLINE_URL}?param={},day,,,{}",
            urlencoding::encode(symbol),
            KLINE_FETCH_BARS,
        );
        debug!(url = %url, "Fetching Tencent day bars");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Tencent kline request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("Tencent kline error {status}");
        }

        let parsed: TencentKlineResponse = resp
            .json()
            .await
            .context("Failed to parse Tencent kline response")?;

        if parsed.code != 0 {
            bail!("Tencent kline error code {}", parsed.code);
        }

        let series = parsed
            .data
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(symbol))
            .map(|(_, v)| v)
            .unwrap_or_default();

        // Adjusted series when the plain one is absent (some boards).
        if series.day.is_empty() {
            Ok(series.qfqday)
        } else {
            Ok(series.day)
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Exchange prefix for a bare instrument code: Shanghai for 6xxxxx/9xxxxx,
/// Shenzhen otherwise.
fn prefixed_symbol(instrument: &str) -> String {
    if instrument.starts_with('6') || instrument.starts_with('9') {
        format!("sh{instrument}")
    } else {
        format!("sz{instrument}")
    }
}

fn field_f64(parts: &[&str], idx: usize) -> Option<f64> {
    parts.get(idx).and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            t.parse::<f64>().ok()
        }
    })
}

/// Parse a `v_shXXXXXX="1~name~code~...";` quote line.
fn parse_quote(body: &str) -> Result<TencentQuote> {
    let payload = body
        .trim()
        .split_once('=')
        .map(|(_, rhs)| rhs)
        .context("Unexpected Tencent quote shape (no assignment)")?;
    let payload = payload
        .trim()
        .trim_end_matches(';')
        .trim_matches('"');

    let parts: Vec<&str> = payload.split('~').collect();
    if parts.len() < MIN_QUOTE_FIELDS {
        bail!(
            "Unexpected Tencent quote shape ({} fields, unknown symbol?)",
            parts.len(),
        );
    }

    Ok(TencentQuote {
        price: field_f64(&parts, F_PRICE),
        pre_close: field_f64(&parts, F_PRE_CLOSE),
        open: field_f64(&parts, F_OPEN),
        high: field_f64(&parts, F_HIGH),
        low: field_f64(&parts, F_LOW),
        volume_lots: field_f64(&parts, F_VOLUME_LOTS),
        amount_wan: field_f64(&parts, F_AMOUNT_WAN),
        float_cap_yi: field_f64(&parts, F_FLOAT_CAP_YI),
    })
}

fn cell_f64(cell: Option<&serde_json::Value>) -> Option<f64> {
    match cell {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Average volume over the trailing completed sessions. Bars are
/// `[date, open, close, high, low, volume]`; the current session's bar is
/// excluded so the baseline only covers finished days.
fn average_volume(bars: &[Vec<serde_json::Value>], as_of: NaiveDate) -> Option<f64> {
    let session = as_of.format("%Y-%m-%d").to_string();
    let volumes: Vec<f64> = bars
        .iter()
        .filter(|bar| {
            bar.first()
                .and_then(|d| d.as_str())
                .map(|d| d != session)
                .unwrap_or(false)
        })
        .filter_map(|bar| cell_f64(bar.get(5)))
        .collect();

    let tail: Vec<f64> = volumes
        .iter()
        .rev()
        .take(AVG_LOOKBACK_DAYS)
        .copied()
        .collect();
    if tail.is_empty() {
        None
    } else {
        Some(tail.iter().sum::<f64>() / tail.len() as f64)
    }
}

/// Assemble the raw record, keeping the feed's units. Float share count is
/// derived from float market cap (100M yuan units) and the latest price.
fn build_record(instrument: &str, quote: &TencentQuote, avg_volume: Option<f64>) -> RawRecord {
    let float_shares = match (quote.float_cap_yi, quote.price) {
        (Some(cap), Some(price)) if price > 0.0 => Some(cap * 1e8 / price),
        _ => None,
    };

    RawRecord {
        instrument: instrument.to_string(),
        source: SOURCE_NAME.to_string(),
        fetched_at: Utc::now(),
        price: quote.price,
        pre_close: quote.pre_close,
        open: quote.open,
        high: quote.high,
        low: quote.low,
        volume: quote.volume_lots,
        amount: quote.amount_wan,
        float_shares,
        avg_volume_5d: avg_volume,
    }
}

// ---------------------------------------------------------------------------
// QuoteSource trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl QuoteSource for TencentSource {
    /// Fetch the current-session record. A failed kline call degrades the
    /// record (no average volume) instead of failing the fetch; a failed
    /// quote call fails it.
    async fn fetch(&self, instrument: &str, as_of: NaiveDate) -> Result<RawRecord> {
        let today = Local::now().date_naive();
        if as_of != today {
            bail!("tencent serves current-session quotes only (requested {as_of})");
        }

        let symbol = prefixed_symbol(instrument);
        let quote = self.fetch_quote(&symbol).await?;

        let avg_volume = match self.fetch_day_bars(&symbol).await {
            Ok(bars) => average_volume(&bars, as_of),
            Err(e) => {
                warn!(instrument, error = %e, "Tencent kline failed, record carries no average volume");
                None
            }
        };

        Ok(build_record(instrument, &quote, avg_volume))
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
