//! Sina realtime quote feed.
//!
//! Fallback source. Two requests per fetch:
//! - `hq.sinajs.cn/list=<symbol>` — comma-separated realtime quote string
//! - `CN_MarketData.getKLineData` — recent day bars for the trailing
//!   average volume
//!
//! Units as reported by the feed: volume in raw shares, amount in yuan.
//! The list endpoint carries no float share count, so records from this
//! source cannot produce a turnover rate downstream. Both endpoints demand
//! a finance.sina.com.cn Referer and answer in GBK; only ASCII numeric
//! fields are consumed.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::QuoteSource;
use crate::types::RawRecord;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const QUOTE_URL: &str = "https://hq.sinajs.cn/list=";
const KLINE_URL: &str =
    "https://money.finance.sina.com.cn/quotes_service/api/json_v2.php/CN_MarketData.getKLineData";
const REFERER: &str = "https://finance.sina.com.cn";
const SOURCE_NAME: &str = "sina";

/// Trailing days averaged for the volume baseline.
const AVG_LOOKBACK_DAYS: usize = 5;

/// Day bars requested per kline call (lookback + the current session).
const KLINE_FETCH_BARS: usize = AVG_LOOKBACK_DAYS + 1;

/// Minimum comma-separated fields in a usable quote line.
const MIN_QUOTE_FIELDS: usize = 32;

// Field positions in the quote line.
const F_OPEN: usize = 1;
const F_PRE_CLOSE: usize = 2;
const F_PRICE: usize = 3;
const F_HIGH: usize = 4;
const F_LOW: usize = 5;
const F_VOLUME_SHARES: usize = 8;
const F_AMOUNT_YUAN: usize = 9;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

/// Parsed realtime quote, fields in the feed's own units.
#[derive(Debug, Default)]
struct SinaQuote {
    price: Option<f64>,
    pre_close: Option<f64>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    volume_shares: Option<f64>,
    amount_yuan: Option<f64>,
}

/// One day bar from `getKLineData`. Numeric values arrive as strings.
#[derive(Debug, Deserialize)]
struct SinaKlineBar {
    day: String,
    #[serde(default)]
    volume: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Sina quote feed client.
pub struct SinaSource {
    http: Client,
}

impl SinaSource {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("SPOTLIGHT/0.1.0 (a-share-screener)")
            .build()
            .context("Failed to build HTTP client for Sina")?;

        Ok(Self { http })
    }

    // -- Internal helpers ------------------------------------------------

    async fn fetch_quote(&self, symbol: &str) -> Result<SinaQuote> {
        let url = format!("{QUOTE_URL}{}", urlencoding::encode(symbol));
        debug!(url = %url, "Fetching Sina quote");

        let resp = self
            .http
            .get(&url)
            .header("Referer", REFERER)
            .send()
            .await
            .context("Sina quote request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("Sina quote error {status}");
        }

        let body = resp.text().await.context("Failed to read Sina quote body")?;
        parse_quote(&body)
    }

    async fn fetch_day_bars(&self, symbol: &str) -> Result<Vec<SinaKlineBar>> {
        let url = format!(
            "{KLINE_URL}?symbol={}&scale=240&ma=no&datalen={}",
            urlencoding::encode(symbol),
            KLINE_FETCH_BARS,
        );
        debug!(url = %url, "Fetching Sina day bars");

        let resp = self
            .http
            .get(&url)
            .header("Referer", REFERER)
            .send()
            .await
            .context("Sina kline request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("Sina kline error {status}");
        }

        let bars: Vec<SinaKlineBar> = resp
            .json()
            .await
            .context("Failed to parse Sina kline response")?;
        Ok(bars)
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

/// Parse a `var hq_str_shXXXXXX="name,open,...";` quote line. An unknown
/// symbol answers with an empty payload.
fn parse_quote(body: &str) -> Result<SinaQuote> {
    let payload = body
        .trim()
        .split_once('=')
        .map(|(_, rhs)| rhs)
        .context("Unexpected Sina quote shape (no assignment)")?;
    let payload = payload.trim().trim_end_matches(';').trim_matches('"');

    if payload.is_empty() {
        bail!("Sina returned no data for this symbol");
    }

    let parts: Vec<&str> = payload.split(',').collect();
    if parts.len() < MIN_QUOTE_FIELDS {
        bail!("Unexpected Sina quote shape ({} fields)", parts.len());
    }

    Ok(SinaQuote {
        price: field_f64(&parts, F_PRICE),
        pre_close: field_f64(&parts, F_PRE_CLOSE),
        open: field_f64(&parts, F_OPEN),
        high: field_f64(&parts, F_HIGH),
        low: field_f64(&parts, F_LOW),
        volume_shares: field_f64(&parts, F_VOLUME_SHARES),
        amount_yuan: field_f64(&parts, F_AMOUNT_YUAN),
    })
}

/// Average volume over the trailing completed sessions, excluding the
/// current session's bar.
fn average_volume(bars: &[SinaKlineBar], as_of: NaiveDate) -> Option<f64> {
    let session = as_of.format("%Y-%m-%d").to_string();
    let volumes: Vec<f64> = bars
        .iter()
        .filter(|bar| bar.day != session)
        .filter_map(|bar| bar.volume.trim().parse::<f64>().ok())
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

/// Assemble the raw record, keeping the feed's units. No float share count
/// is available from this feed.
fn build_record(instrument: &str, quote: &SinaQuote, avg_volume: Option<f64>) -> RawRecord {
    RawRecord {
        instrument: instrument.to_string(),
        source: SOURCE_NAME.to_string(),
        fetched_at: Utc::now(),
        price: quote.price,
        pre_close: quote.pre_close,
        open: quote.open,
        high: quote.high,
        low: quote.low,
        volume: quote.volume_shares,
        amount: quote.amount_yuan,
        float_shares: None,
        avg_volume_5d: avg_volume,
    }
}

// ---------------------------------------------------------------------------
// QuoteSource trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl QuoteSource for SinaSource {
    /// Fetch the current-session record. A failed kline call degrades the
    /// record (no average volume) instead of failing the fetch; a failed
    /// quote call fails it.
    async fn fetch(&self, instrument: &str, as_of: NaiveDate) -> Result<RawRecord> {
        let today = Local::now().date_naive();
        if as_of != today {
            bail!("sina serves current-session quotes only (requested {as_of})");
        }

        let symbol = prefixed_symbol(instrument);
        let quote = self.fetch_quote(&symbol).await?;

        let avg_volume = match self.fetch_day_bars(&symbol).await {
            Ok(bars) => average_volume(&bars, as_of),
            Err(e) => {
                warn!(instrument, error = %e, "Sina kline failed, record carries no average volume");
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
