//! Configuration loading from TOML into strongly-typed structs.
//!
//! Every threshold that affects a screening decision is a required key:
//! a missing key fails the load instead of picking up a silent default.
//! `Default` impls carry the documented values for in-code construction
//! (tests, embedding callers); the file loader never falls back to them.

use crate::types::ScreenError;
use serde::Deserialize;
use std::fs;

/// Source handler names the binary knows how to construct.
pub const KNOWN_SOURCES: &[&str] = &["tencent", "sina", "tushare"];

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub sources: SourcesConfig,
    pub gateway: GatewayConfig,
    pub scoring: ScoringConfig,
    pub decision: DecisionConfig,
}

/// Source resolution chain.
#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    /// Handler names in priority order; the first healthy one wins.
    pub order: Vec<String>,
    /// Per-handler fetch timeout. A stalled handler counts as a failure.
    pub timeout_secs: u64,
}

/// Admission thresholds for the filter gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Minimum volume-ratio for admission
    pub min_volume_multiplier: f64,
    /// Turnover-rate admission band, percent of float
    pub min_turnover_rate: f64,
    pub max_turnover_rate: f64,
    /// Irreversible disqualification ceiling
    pub death_turnover_threshold: f64,
    /// Advisory-tag band; carries no scoring weight
    pub sweet_spot_min: f64,
    pub sweet_spot_max: f64,
}

/// Sub-score weights and the ranking eligibility threshold.
#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    pub pattern_weight: f64,
    pub capital_weight: f64,
    pub risk_weight: f64,
    pub min_composite_score: f64,
}

/// Guard-clause thresholds for the decision classifier.
#[derive(Debug, Deserialize, Clone)]
pub struct DecisionConfig {
    /// Capital-flow ratio below this is a PASS (percent)
    pub capital_ratio_low: f64,
    /// Capital-flow ratio above this is a TRAP (percent)
    pub capital_ratio_high: f64,
    /// Risk level at or above this triggers BLOCK when traps are present
    pub risk_threshold: f64,
    /// FOCUS band, inclusive (percent)
    pub standard_band_low: f64,
    pub standard_band_high: f64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        SourcesConfig {
            order: KNOWN_SOURCES.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 10,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            min_volume_multiplier: 1.0,
            min_turnover_rate: 5.0,
            max_turnover_rate: 60.0,
            death_turnover_threshold: 70.0,
            sweet_spot_min: 8.0,
            sweet_spot_max: 15.0,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            pattern_weight: 0.40,
            capital_weight: 0.40,
            risk_weight: 0.20,
            min_composite_score: 0.60,
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        DecisionConfig {
            capital_ratio_low: 0.5,
            capital_ratio_high: 5.0,
            risk_threshold: 0.4,
            standard_band_low: 1.0,
            standard_band_high: 3.0,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            sources: SourcesConfig::default(),
            gateway: GatewayConfig::default(),
            scoring: ScoringConfig::default(),
            decision: DecisionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file. Fatal on any missing key.
    pub fn load(path: &str) -> Result<Self, ScreenError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ScreenError::Config(format!("Failed to read config file {path}: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ScreenError> {
        let config: AppConfig = toml::from_str(contents)
            .map_err(|e| ScreenError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that parse but cannot be screened with.
    pub fn validate(&self) -> Result<(), ScreenError> {
        if self.sources.order.is_empty() {
            return Err(ScreenError::Config(
                "sources.order must name at least one handler".to_string(),
            ));
        }
        for name in &self.sources.order {
            if !KNOWN_SOURCES.contains(&name.as_str()) {
                return Err(ScreenError::Config(format!(
                    "Unknown source handler: {name} (known: {})",
                    KNOWN_SOURCES.join(", "),
                )));
            }
        }
        if self.sources.timeout_secs == 0 {
            return Err(ScreenError::Config(
                "sources.timeout_secs must be positive".to_string(),
            ));
        }
        // TOML parses inf and nan as floats, and NaN slides past every
        // ordered comparison below, so finiteness is checked first.
        for (name, value) in [
            ("gateway.min_volume_multiplier", self.gateway.min_volume_multiplier),
            ("gateway.min_turnover_rate", self.gateway.min_turnover_rate),
            ("gateway.max_turnover_rate", self.gateway.max_turnover_rate),
            ("gateway.death_turnover_threshold", self.gateway.death_turnover_threshold),
            ("gateway.sweet_spot_min", self.gateway.sweet_spot_min),
            ("gateway.sweet_spot_max", self.gateway.sweet_spot_max),
            ("scoring.pattern_weight", self.scoring.pattern_weight),
            ("scoring.capital_weight", self.scoring.capital_weight),
            ("scoring.risk_weight", self.scoring.risk_weight),
            ("scoring.min_composite_score", self.scoring.min_composite_score),
            ("decision.capital_ratio_low", self.decision.capital_ratio_low),
            ("decision.capital_ratio_high", self.decision.capital_ratio_high),
            ("decision.risk_threshold", self.decision.risk_threshold),
            ("decision.standard_band_low", self.decision.standard_band_low),
            ("decision.standard_band_high", self.decision.standard_band_high),
        ] {
            if !value.is_finite() {
                return Err(ScreenError::Config(format!(
                    "{name} must be a finite number, got {value}",
                )));
            }
        }
        if self.gateway.min_turnover_rate > self.gateway.max_turnover_rate {
            return Err(ScreenError::Config(format!(
                "Inverted turnover band: min {} > max {}",
                self.gateway.min_turnover_rate, self.gateway.max_turnover_rate,
            )));
        }
        if self.gateway.sweet_spot_min > self.gateway.sweet_spot_max {
            return Err(ScreenError::Config(format!(
                "Inverted sweet-spot band: min {} > max {}",
                self.gateway.sweet_spot_min, self.gateway.sweet_spot_max,
            )));
        }
        if self.gateway.death_turnover_threshold <= 0.0 {
            return Err(ScreenError::Config(
                "gateway.death_turnover_threshold must be positive".to_string(),
            ));
        }
        if self.gateway.min_volume_multiplier < 0.0 {
            return Err(ScreenError::Config(
                "gateway.min_volume_multiplier must not be negative".to_string(),
            ));
        }
        for (name, w) in [
            ("pattern_weight", self.scoring.pattern_weight),
            ("capital_weight", self.scoring.capital_weight),
            ("risk_weight", self.scoring.risk_weight),
        ] {
            if w <= 0.0 {
                return Err(ScreenError::Config(format!(
                    "scoring.{name} must be positive, got {w}",
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.scoring.min_composite_score) {
            return Err(ScreenError::Config(format!(
                "scoring.min_composite_score must be in [0,1], got {}",
                self.scoring.min_composite_score,
            )));
        }
        if self.decision.capital_ratio_low >= self.decision.capital_ratio_high {
            return Err(ScreenError::Config(format!(
                "decision.capital_ratio_low {} must be below capital_ratio_high {}",
                self.decision.capital_ratio_low, self.decision.capital_ratio_high,
            )));
        }
        if self.decision.standard_band_low > self.decision.standard_band_high {
            return Err(ScreenError::Config(format!(
                "Inverted standard band: low {} > high {}",
                self.decision.standard_band_low, self.decision.standard_band_high,
            )));
        }
        Ok(())
    }
}
