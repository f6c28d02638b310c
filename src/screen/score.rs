//! Opportunity scoring.
//!
//! Folds the enrichment factors into three sub-scores (pattern quality,
//! capital-flow strength, risk safety), each normalized to [0, 1], then a
//! weighted composite. Weights come from configuration; the credit tables
//! below are calibration constants and stay in code.
//!
//! Scoring is total and deterministic: any input, including junk from a
//! partial enrichment dump, produces a composite in [0, 1].

use std::cmp::Ordering;

use tracing::debug;

use crate::config::ScoringConfig;
use crate::types::{OpportunityFactors, ScoreResult};

// ---------------------------------------------------------------------------
// Calibration constants
// ---------------------------------------------------------------------------

/// Credit for any detected pattern at all.
const PATTERN_BASE_CREDIT: f64 = 0.35;
/// Weight on the detector's own confidence.
const PATTERN_QUALITY_WEIGHT: f64 = 0.25;
/// Credit for a calm consolidation platform.
const CALM_PLATFORM_CREDIT: f64 = 0.15;
/// Daily band width at or under which the calm credit is full.
const CALM_FULL_AT: f64 = 0.03;
/// Band width at which the calm credit has faded to zero.
const CALM_GONE_AT: f64 = 0.08;
/// Weight on breakout strength.
const BREAKOUT_WEIGHT: f64 = 0.15;
/// Credit for a volume surge over the consolidation average.
const SURGE_CREDIT: f64 = 0.10;
/// Surge ratio treated as "no surge".
const SURGE_BASELINE: f64 = 1.0;
/// Surge ratio at which the credit is full.
const SURGE_FULL_AT: f64 = 3.0;

/// Weight on inflow persistence strength.
const INFLOW_STRENGTH_WEIGHT: f64 = 0.40;
/// Credit for sustained multi-day inflow.
const SUSTAINED_INFLOW_CREDIT: f64 = 0.20;
/// Net-inflow tiers in yuan, largest first: (floor, credit).
const INFLOW_TIERS: [(f64, f64); 4] = [
    (50_000_000.0, 0.40),
    (20_000_000.0, 0.30),
    (10_000_000.0, 0.20),
    (5_000_000.0, 0.10),
];

/// Penalty when any trap signal is present.
const TRAP_SIGNAL_PENALTY: f64 = 0.40;
/// Weight on sector-level risk.
const SECTOR_RISK_WEIGHT: f64 = 0.30;
/// Weight on hostile market sentiment.
const SENTIMENT_WEIGHT: f64 = 0.30;

// ---------------------------------------------------------------------------
// Sub-scores
// ---------------------------------------------------------------------------

/// Clamp an externally supplied fraction to the unit interval; junk reads
/// as zero.
fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn pattern_fraction(factors: &OpportunityFactors) -> f64 {
    if !factors.has_pattern() {
        return 0.0;
    }

    let volatility = if factors.platform_volatility.is_finite() {
        factors.platform_volatility.max(0.0)
    } else {
        CALM_GONE_AT
    };
    let calm = ((CALM_GONE_AT - volatility) / (CALM_GONE_AT - CALM_FULL_AT)).clamp(0.0, 1.0);

    let surge = if factors.volume_surge.is_finite() {
        ((factors.volume_surge - SURGE_BASELINE) / (SURGE_FULL_AT - SURGE_BASELINE))
            .clamp(0.0, 1.0)
    } else {
        0.0
    };

    (PATTERN_BASE_CREDIT
        + PATTERN_QUALITY_WEIGHT * unit(factors.pattern_quality)
        + CALM_PLATFORM_CREDIT * calm
        + BREAKOUT_WEIGHT * unit(factors.breakout_strength)
        + SURGE_CREDIT * surge)
        .min(1.0)
}

fn inflow_tier(net_inflow: f64) -> f64 {
    if !net_inflow.is_finite() {
        return 0.0;
    }
    INFLOW_TIERS
        .iter()
        .find(|(floor, _)| net_inflow >= *floor)
        .map(|(_, credit)| *credit)
        .unwrap_or(0.0)
}

fn capital_fraction(factors: &OpportunityFactors) -> f64 {
    let sustained = if factors.sustained_inflow {
        SUSTAINED_INFLOW_CREDIT
    } else {
        0.0
    };
    (INFLOW_STRENGTH_WEIGHT * unit(factors.inflow_strength)
        + inflow_tier(factors.net_inflow)
        + sustained)
        .min(1.0)
}

/// Risk safety: 1.0 is a clean setup, 0.0 is a minefield. Points the
/// opposite direction from the decision tree's `risk_level` hazard input.
fn risk_fraction(factors: &OpportunityFactors) -> f64 {
    let mut score = 1.0;
    if factors.trap_signals > 0 {
        score -= TRAP_SIGNAL_PENALTY;
    }
    score -= SECTOR_RISK_WEIGHT * unit(factors.sector_risk);
    score -= SENTIMENT_WEIGHT * (1.0 - unit(factors.market_sentiment));
    score.max(0.0)
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Weighted composite scorer over an immutable config snapshot.
pub struct OpportunityScorer {
    config: ScoringConfig,
}

impl OpportunityScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Composite threshold an instrument must clear to be selectable.
    pub fn min_composite(&self) -> f64 {
        self.config.min_composite_score
    }

    /// Score one instrument. The composite is the weighted mean of the
    /// three sub-scores, so it inherits their [0, 1] bound.
    pub fn score(&self, factors: &OpportunityFactors) -> ScoreResult {
        let pattern_score = pattern_fraction(factors);
        let capital_score = capital_fraction(factors);
        let risk_score = risk_fraction(factors);

        let w = &self.config;
        let weight_sum = w.pattern_weight + w.capital_weight + w.risk_weight;
        let composite = (w.pattern_weight * pattern_score
            + w.capital_weight * capital_score
            + w.risk_weight * risk_score)
            / weight_sum;

        debug!(
            instrument = %factors.instrument,
            pattern = pattern_score,
            capital = capital_score,
            risk = risk_score,
            composite,
            "Scored instrument"
        );

        ScoreResult {
            instrument: factors.instrument.clone(),
            pattern_score,
            capital_score,
            risk_score,
            composite,
        }
    }

    /// Score a slice and sort descending by composite. The sort is stable:
    /// equal composites keep their input order.
    pub fn rank(&self, factors: &[OpportunityFactors]) -> Vec<ScoreResult> {
        let mut results: Vec<ScoreResult> = factors.iter().map(|f| self.score(f)).collect();
        results.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(Ordering::Equal)
        });
        results
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
