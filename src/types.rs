//! Shared types for the SPOTLIGHT screening pipeline.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that source, screen, and
//! binary modules can depend on them without circular references.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Raw record
// ---------------------------------------------------------------------------

/// One instrument snapshot exactly as an upstream feed reported it.
///
/// Numeric fields are `Option<f64>` because feeds disagree on both coverage
/// and units: volume may be raw shares or lots of 100, amount may be yuan or
/// ten-thousands of yuan, float share count may be raw or in ten-thousands.
/// A present value may still be NaN, infinite, or negative. Nothing here is
/// safe to consume until the sanitizer has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub instrument: String,
    /// Source identifier: "tencent" | "sina" | "tushare" | test doubles
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub price: Option<f64>,
    pub pre_close: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    /// Session volume in the source's own unit (shares or lots)
    pub volume: Option<f64>,
    /// Session amount in the source's own unit (yuan, 1e3 yuan, or 1e4 yuan)
    pub amount: Option<f64>,
    /// Float share count in the source's own unit (shares or 1e4 shares)
    pub float_shares: Option<f64>,
    /// Trailing 5-day average volume, same unit as `volume`
    pub avg_volume_5d: Option<f64>,
}

impl fmt::Display for RawRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} px={:?} vol={:?} float={:?}",
            self.source, self.instrument, self.price, self.volume, self.float_shares,
        )
    }
}

impl RawRecord {
    /// An empty record carrying only identity; every field still needs data.
    pub fn empty(instrument: &str, source: &str) -> Self {
        RawRecord {
            instrument: instrument.to_string(),
            source: source.to_string(),
            fetched_at: Utc::now(),
            price: None,
            pre_close: None,
            open: None,
            high: None,
            low: None,
            volume: None,
            amount: None,
            float_shares: None,
            avg_volume_5d: None,
        }
    }

    /// Helper to build a well-formed test record with sensible defaults.
    #[cfg(test)]
    pub fn sample() -> Self {
        RawRecord {
            instrument: "600519".to_string(),
            source: "sina".to_string(),
            fetched_at: Utc::now(),
            price: Some(1700.0),
            pre_close: Some(1680.0),
            open: Some(1685.0),
            high: Some(1712.0),
            low: Some(1679.0),
            volume: Some(25_000_000.0),
            amount: Some(4.2e10),
            float_shares: Some(1_256_000_000.0),
            avg_volume_5d: Some(20_000_000.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Sanitized snapshot
// ---------------------------------------------------------------------------

/// A physically consistent view of one instrument's session.
///
/// Every numeric field is finite; everything except `change_percent` is
/// non-negative; `turnover_rate` and `volume_ratio` are clamped to [0, 100].
/// Immutable after construction: the pipeline hands out shared references
/// only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedSnapshot {
    pub instrument: String,
    pub price: f64,
    pub pre_close: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    /// Session amount, normalized to yuan
    pub amount: f64,
    /// Turnover rate as a percentage of float, clamped to [0, 100]
    pub turnover_rate: f64,
    /// Current volume over trailing 5-day average volume, clamped to [0, 100]
    pub volume_ratio: f64,
    /// Percent change against pre-close; the one field allowed to be negative
    pub change_percent: f64,
    /// True only when price, pre-close, turnover, and volume ratio are all
    /// strictly positive
    pub is_valid: bool,
}

impl fmt::Display for SanitizedSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.change_percent >= 0.0 { "+" } else { "" };
        write!(
            f,
            "[{}] px={:.2} ({sign}{:.2}%) turnover={:.2}% volratio={:.2}{}",
            self.instrument,
            self.price,
            self.change_percent,
            self.turnover_rate,
            self.volume_ratio,
            if self.is_valid { "" } else { " INVALID" },
        )
    }
}

impl SanitizedSnapshot {
    /// Helper to build a healthy mid-range snapshot for tests.
    #[cfg(test)]
    pub fn sample() -> Self {
        SanitizedSnapshot {
            instrument: "600519".to_string(),
            price: 1700.0,
            pre_close: 1680.0,
            open: 1685.0,
            high: 1712.0,
            low: 1679.0,
            amount: 4.2e10,
            turnover_rate: 10.0,
            volume_ratio: 1.8,
            change_percent: 1.19,
            is_valid: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Opportunity factors
// ---------------------------------------------------------------------------

/// Enrichment inputs for one instrument, supplied by the upstream
/// pattern/capital-flow collaborators. The pipeline never computes these;
/// it only consumes them for scoring and classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpportunityFactors {
    pub instrument: String,
    /// Detected pattern label, e.g. "platform-breakout"; None = no pattern
    pub pattern_type: Option<String>,
    /// Pattern confidence (0–1)
    pub pattern_quality: f64,
    /// Breakout strength (0–1)
    pub breakout_strength: f64,
    /// Current volume over consolidation-period average (1.0 = no surge)
    pub volume_surge: f64,
    /// Daily band width during the consolidation platform (0.03 = 3%)
    pub platform_volatility: f64,
    /// Net directional inflow in yuan; negative = outflow
    pub net_inflow: f64,
    /// Inflow persistence strength (0–1)
    pub inflow_strength: f64,
    pub sustained_inflow: bool,
    /// Externally detected trap indicators (blow-off pattern etc.)
    pub trap_signals: u32,
    /// Sector-level risk (0–1)
    pub sector_risk: f64,
    /// Broad market sentiment (0 = hostile, 1 = supportive)
    pub market_sentiment: f64,
    /// Net inflow over float market value, as a percentage; None = undefined
    pub capital_flow_ratio: Option<f64>,
    /// Aggregate hazard level (0–1) consumed by the decision tree; points the
    /// opposite direction from the scorer's risk-safety sub-score
    pub risk_level: f64,
    /// Price rose without matching inflow (classic distribution warning)
    pub price_up_without_inflow: bool,
}

impl fmt::Display for OpportunityFactors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] pattern={} inflow={:.0} ratio={} traps={} risk={:.2}",
            self.instrument,
            self.pattern_type.as_deref().unwrap_or("-"),
            self.net_inflow,
            self.capital_flow_ratio
                .map(|r| format!("{r:.2}%"))
                .unwrap_or_else(|| "-".to_string()),
            self.trap_signals,
            self.risk_level,
        )
    }
}

impl OpportunityFactors {
    /// Baseline factors for an instrument with no enrichment available.
    /// Scores near zero and classifies as PASS (undefined capital ratio).
    pub fn neutral(instrument: &str) -> Self {
        OpportunityFactors {
            instrument: instrument.to_string(),
            ..Default::default()
        }
    }

    /// Whether the enrichment detected any usable pattern.
    pub fn has_pattern(&self) -> bool {
        self.pattern_type
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Score result
// ---------------------------------------------------------------------------

/// Output of the opportunity scorer for one instrument.
///
/// Sub-scores are normalized to [0, 1]; `composite` is their weighted mean
/// and is always in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub instrument: String,
    /// Pattern quality (0–1)
    pub pattern_score: f64,
    /// Capital-flow strength (0–1)
    pub capital_score: f64,
    /// Risk safety (0–1); higher means safer
    pub risk_score: f64,
    pub composite: f64,
}

impl fmt::Display for ScoreResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] pattern={:.2} capital={:.2} risk={:.2} => composite={:.2}",
            self.instrument, self.pattern_score, self.capital_score, self.risk_score, self.composite,
        )
    }
}

impl ScoreResult {
    /// Whether this result clears the configured ranking threshold.
    pub fn is_eligible(&self, min_composite: f64) -> bool {
        self.composite >= min_composite
    }
}

// ---------------------------------------------------------------------------
// Decision tag
// ---------------------------------------------------------------------------

/// Terminal classification for one instrument. Closed set: downstream
/// renderers and selection logic match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionTag {
    /// Capital flow too weak to act on
    Pass,
    /// Blow-off risk; price likely being distributed into
    Trap,
    /// Elevated risk with warning signals
    Block,
    /// Qualifies as the day's primary candidate
    Focus,
    /// Borderline; assigned to ranked alternates, pool-dependent
    Watch,
}

impl DecisionTag {
    /// All known tags (useful for iteration).
    pub const ALL: &'static [DecisionTag] = &[
        DecisionTag::Pass,
        DecisionTag::Trap,
        DecisionTag::Block,
        DecisionTag::Focus,
        DecisionTag::Watch,
    ];
}

impl fmt::Display for DecisionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionTag::Pass => write!(f, "PASS"),
            DecisionTag::Trap => write!(f, "TRAP"),
            DecisionTag::Block => write!(f, "BLOCK"),
            DecisionTag::Focus => write!(f, "FOCUS"),
            DecisionTag::Watch => write!(f, "WATCH"),
        }
    }
}

/// Attempt to parse a string into a DecisionTag (case-insensitive).
impl std::str::FromStr for DecisionTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pass" => Ok(DecisionTag::Pass),
            "trap" => Ok(DecisionTag::Trap),
            "block" => Ok(DecisionTag::Block),
            "focus" => Ok(DecisionTag::Focus),
            "watch" => Ok(DecisionTag::Watch),
            _ => Err(anyhow::anyhow!("Unknown decision tag: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Daily selection
// ---------------------------------------------------------------------------

/// One ranked row of the daily pick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionEntry {
    pub instrument: String,
    pub composite: f64,
    pub tag: DecisionTag,
}

impl fmt::Display for SelectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({:.2})", self.tag, self.instrument, self.composite)
    }
}

/// The day's pick: one primary candidate plus up to three ranked alternates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySelection {
    pub as_of: NaiveDate,
    pub primary: SelectionEntry,
    pub alternates: Vec<SelectionEntry>,
}

impl fmt::Display for DailySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} primary: {}", self.as_of, self.primary)?;
        if !self.alternates.is_empty() {
            let alts: Vec<String> = self.alternates.iter().map(|a| a.to_string()).collect();
            write!(f, " | alternates: {}", alts.join(", "))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// One failed fetch attempt inside a resolution walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.reason)
    }
}

/// Domain-specific error types for SPOTLIGHT.
///
/// Malformed market data never appears here: the sanitizer absorbs it.
#[derive(Debug, thiserror::Error)]
pub enum ScreenError {
    /// Every configured source failed for one instrument. Carries the
    /// per-handler reasons in attempt order; the instrument is skipped,
    /// never substituted.
    #[error("All sources exhausted for {instrument} after {} attempts", failures.len())]
    SourceExhausted {
        instrument: String,
        failures: Vec<SourceFailure>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
