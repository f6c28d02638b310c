//! Tushare Pro daily-bar source.
//!
//! Token-gated fallback: requires a `TUSHARE_TOKEN` environment variable
//! and reports its absence as an ordinary failure so the resolver can move
//! on. Unlike the realtime feeds this API serves any trade date.
//!
//! API docs: https://tushare.pro/document/2
//! Protocol: POST JSON to a single endpoint, `api_name` selects the call.
//! Units as reported: volume in lots of 100 shares, amount in units of
//! 1,000 yuan, float share count in units of 10,000 shares.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use super::QuoteSource;
use crate::types::RawRecord;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://api.tushare.pro";
const SOURCE_NAME: &str = "tushare";
const TOKEN_ENV: &str = "TUSHARE_TOKEN";

/// Trailing completed sessions averaged for the volume baseline.
const AVG_LOOKBACK_DAYS: usize = 5;

/// Calendar days requested per daily call; wide enough to cover five trade
/// days across holiday weeks.
const LOOKBACK_CALENDAR_DAYS: i64 = 14;

const DAILY_FIELDS: &str = "ts_code,trade_date,open,high,low,close,pre_close,vol,amount";
const BASIC_FIELDS: &str = "ts_code,trade_date,float_share";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TushareResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<TushareData>,
}

/// Column-oriented payload: `fields` names the columns, `items` holds rows
/// newest-first. Cells may be numbers, strings, or null.
#[derive(Debug, Deserialize)]
struct TushareData {
    fields: Vec<String>,
    items: Vec<Vec<serde_json::Value>>,
}

impl TushareData {
    fn column(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    fn cell_f64(&self, row: &[serde_json::Value], name: &str) -> Option<f64> {
        match row.get(self.column(name)?) {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    fn cell_str<'a>(&self, row: &'a [serde_json::Value], name: &str) -> Option<&'a str> {
        row.get(self.column(name)?).and_then(|v| v.as_str())
    }
}

fn into_data(resp: TushareResponse) -> Result<TushareData> {
    if resp.code != 0 {
        bail!(
            "Tushare API error {}: {}",
            resp.code,
            resp.msg.unwrap_or_default(),
        );
    }
    resp.data.context("Tushare response carried no data")
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Tushare Pro client. Holds the API token as a secret; it is only exposed
/// at request-build time.
pub struct TushareSource {
    http: Client,
    token: Option<SecretString>,
}

impl TushareSource {
    pub fn new(token: Option<SecretString>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("SPOTLIGHT/0.1.0 (a-share-screener)")
            .build()
            .context("Failed to build HTTP client for Tushare")?;

        Ok(Self { http, token })
    }

    /// Construct from the `TUSHARE_TOKEN` environment variable. A missing
    /// or blank token still builds the handler; it will decline fetches.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(Secret::new);
        Self::new(token)
    }

    // -- Internal helpers ------------------------------------------------

    async fn call(
        &self,
        api_name: &str,
        params: serde_json::Value,
        fields: &str,
    ) -> Result<TushareData> {
        let token = self
            .token
            .as_ref()
            .with_context(|| format!("{TOKEN_ENV} not configured"))?;

        let body = serde_json::json!({
            "api_name": api_name,
            "token": token.expose_secret(),
            "params": params,
            "fields": fields,
        });

        debug!(api_name, "Calling Tushare");

        let resp = self
            .http
            .post(BASE_URL)
            .json(&body)
            .send()
            .await
            .context("Tushare request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("Tushare HTTP error {status}");
        }

        let parsed: TushareResponse = resp
            .json()
            .await
            .context("Failed to parse Tushare response")?;
        into_data(parsed)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Tushare symbol format: bare code plus exchange suffix. Already-suffixed
/// codes pass through.
fn ts_code(instrument: &str) -> String {
    if instrument.contains('.') {
        return instrument.to_uppercase();
    }
    if instrument.starts_with('6') || instrument.starts_with('9') {
        format!("{instrument}.SH")
    } else {
        format!("{instrument}.SZ")
    }
}

/// Assemble the raw record from the daily window plus the optional
/// daily_basic row, keeping the API's units.
fn build_record(
    instrument: &str,
    daily: &TushareData,
    basic: Option<&TushareData>,
    as_of: NaiveDate,
) -> Result<RawRecord> {
    let session = as_of.format("%Y%m%d").to_string();
    let row = daily
        .items
        .iter()
        .find(|r| daily.cell_str(r, "trade_date") == Some(session.as_str()))
        .with_context(|| format!("No Tushare daily bar for {as_of} (non-trading day?)"))?;

    // Rows arrive newest-first; the five most recent completed sessions
    // form the baseline.
    let prior: Vec<f64> = daily
        .items
        .iter()
        .filter(|r| daily.cell_str(r, "trade_date") != Some(session.as_str()))
        .filter_map(|r| daily.cell_f64(r, "vol"))
        .take(AVG_LOOKBACK_DAYS)
        .collect();
    let avg_volume_5d = if prior.is_empty() {
        None
    } else {
        Some(prior.iter().sum::<f64>() / prior.len() as f64)
    };

    let float_shares = basic.and_then(|b| {
        b.items
            .first()
            .and_then(|r| b.cell_f64(r, "float_share"))
    });

    Ok(RawRecord {
        instrument: instrument.to_string(),
        source: SOURCE_NAME.to_string(),
        fetched_at: Utc::now(),
        price: daily.cell_f64(row, "close"),
        pre_close: daily.cell_f64(row, "pre_close"),
        open: daily.cell_f64(row, "open"),
        high: daily.cell_f64(row, "high"),
        low: daily.cell_f64(row, "low"),
        volume: daily.cell_f64(row, "vol"),
        amount: daily.cell_f64(row, "amount"),
        float_shares,
        avg_volume_5d,
    })
}

// ---------------------------------------------------------------------------
// QuoteSource trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl QuoteSource for TushareSource {
    /// Fetch the daily bar for the requested trade date. A failed
    /// daily_basic call degrades the record (no float share count) instead
    /// of failing the fetch.
    async fn fetch(&self, instrument: &str, as_of: NaiveDate) -> Result<RawRecord> {
        let code = ts_code(instrument);
        let end = as_of.format("%Y%m%d").to_string();
        let start = (as_of - chrono::Duration::days(LOOKBACK_CALENDAR_DAYS))
            .format("%Y%m%d")
            .to_string();

        let daily = self
            .call(
                "daily",
                serde_json::json!({"ts_code": code, "start_date": start, "end_date": end}),
                DAILY_FIELDS,
            )
            .await?;

        let basic = match self
            .call(
                "daily_basic",
                serde_json::json!({"ts_code": code, "trade_date": end}),
                BASIC_FIELDS,
            )
            .await
        {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(instrument, error = %e, "Tushare daily_basic failed, record carries no float share count");
                None
            }
        };

        build_record(instrument, &daily, basic.as_ref(), as_of)
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
