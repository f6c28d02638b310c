//! Terminal classification.
//!
//! A fixed-order decision tree over the capital-flow ratio, hazard level,
//! trap signals, and the price-up-without-inflow flag. Guard order is a
//! contract: weak flow is dismissed before blow-off detection, blow-off
//! before risk blocking, and the standard band is only consulted last.
//! Each call is independent; nothing is carried between classifications.
//!
//! WATCH is never produced here. It belongs to the selection layer, which
//! re-tags ranked alternates (see `screen::ScreenPipeline::select`).

use tracing::debug;

use crate::config::DecisionConfig;
use crate::types::{DecisionTag, OpportunityFactors};

/// Fixed-order guard tree over an immutable config snapshot.
pub struct DecisionClassifier {
    config: DecisionConfig,
}

impl DecisionClassifier {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    /// Classify one instrument into a terminal tag.
    pub fn classify(&self, factors: &OpportunityFactors) -> DecisionTag {
        let c = &self.config;
        let instrument = factors.instrument.as_str();

        // Undefined, non-finite, or weak capital flow: nothing to act on.
        let ratio = match factors.capital_flow_ratio.filter(|r| r.is_finite()) {
            Some(r) if r >= c.capital_ratio_low => r,
            _ => {
                debug!(instrument, ratio = ?factors.capital_flow_ratio, "Capital flow absent or weak");
                return DecisionTag::Pass;
            }
        };

        // Extreme inflow ratio reads as distribution into strength.
        if ratio > c.capital_ratio_high {
            debug!(instrument, ratio, high = c.capital_ratio_high, "Ratio past blow-off ceiling");
            return DecisionTag::Trap;
        }

        if factors.trap_signals > 0 && factors.risk_level >= c.risk_threshold {
            debug!(
                instrument,
                traps = factors.trap_signals,
                risk = factors.risk_level,
                "Trap signals with elevated risk"
            );
            return DecisionTag::Block;
        }

        // Price rising on thin flow is the classic pump footprint.
        if factors.price_up_without_inflow && ratio < c.standard_band_low {
            debug!(instrument, ratio, "Price up without capital follow-through");
            return DecisionTag::Trap;
        }

        if ratio >= c.standard_band_low
            && ratio <= c.standard_band_high
            && factors.risk_level < c.risk_threshold
            && factors.trap_signals == 0
        {
            debug!(instrument, ratio, risk = factors.risk_level, "Standard band, clean tape");
            return DecisionTag::Focus;
        }

        debug!(instrument, ratio, risk = factors.risk_level, "No guard matched");
        DecisionTag::Block
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
