//! Admission gateway.
//!
//! Three ordered checks stand between a sanitized snapshot and the scorer:
//! the death-turnover circuit breaker, the volume-ratio screen, and the
//! turnover-rate band. Evaluation short-circuits at the first
//! disqualification and every outcome records which checks actually ran.
//!
//! The sweet-spot tag is advisory only: it marks a turnover sub-band for
//! display and carries no weight in admission or scoring.

use serde::Serialize;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::types::SanitizedSnapshot;

/// Check names as they appear in outcome trails and rejection stats.
pub const FILTER_DEATH_TURNOVER: &str = "death-turnover";
pub const FILTER_VOLUME_RATIO: &str = "volume-ratio";
pub const FILTER_TURNOVER_BAND: &str = "turnover-band";

/// Advisory tag for the favored turnover sub-band.
pub const SWEET_SPOT_TAG: &str = "sweet-spot";

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Gateway verdict for one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct FilterOutcome {
    pub snapshot: SanitizedSnapshot,
    pub admitted: bool,
    /// Name of the check that disqualified the snapshot, when rejected.
    pub rejected_by: Option<&'static str>,
    /// Advisory tag, attached regardless of admission.
    pub advisory: Option<&'static str>,
    /// Checks that ran, in evaluation order.
    pub evaluated: Vec<&'static str>,
}

/// Per-call admission counters. `merge` folds per-worker stats together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub evaluated: u64,
    pub admitted: u64,
    pub rejected_death_turnover: u64,
    pub rejected_volume_ratio: u64,
    pub rejected_turnover_band: u64,
    pub sweet_spot_tags: u64,
}

impl GatewayStats {
    pub fn merge(&mut self, other: &GatewayStats) {
        self.evaluated += other.evaluated;
        self.admitted += other.admitted;
        self.rejected_death_turnover += other.rejected_death_turnover;
        self.rejected_volume_ratio += other.rejected_volume_ratio;
        self.rejected_turnover_band += other.rejected_turnover_band;
        self.sweet_spot_tags += other.sweet_spot_tags;
    }

    fn record(&mut self, outcome: &FilterOutcome) {
        self.evaluated += 1;
        if outcome.admitted {
            self.admitted += 1;
        }
        match outcome.rejected_by {
            Some(FILTER_DEATH_TURNOVER) => self.rejected_death_turnover += 1,
            Some(FILTER_VOLUME_RATIO) => self.rejected_volume_ratio += 1,
            Some(FILTER_TURNOVER_BAND) => self.rejected_turnover_band += 1,
            _ => {}
        }
        if outcome.advisory.is_some() {
            self.sweet_spot_tags += 1;
        }
    }
}

impl std::fmt::Display for GatewayStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "evaluated={} admitted={} | rejected: death={} volratio={} band={} | sweet-spot={}",
            self.evaluated,
            self.admitted,
            self.rejected_death_turnover,
            self.rejected_volume_ratio,
            self.rejected_turnover_band,
            self.sweet_spot_tags,
        )
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Ordered admission checks over an immutable config snapshot.
pub struct FilterGateway {
    config: GatewayConfig,
}

impl FilterGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// Run the checks over a batch, preserving input order.
    pub fn apply(&self, snapshots: Vec<SanitizedSnapshot>) -> (Vec<FilterOutcome>, GatewayStats) {
        let mut stats = GatewayStats::default();
        let outcomes: Vec<FilterOutcome> = snapshots
            .into_iter()
            .map(|snap| {
                let outcome = self.check(snap);
                stats.record(&outcome);
                outcome
            })
            .collect();
        (outcomes, stats)
    }

    /// Evaluate one snapshot. Check order is a contract: the circuit
    /// breaker is always consulted first, and a disqualification stops the
    /// walk there.
    pub fn check(&self, snapshot: SanitizedSnapshot) -> FilterOutcome {
        let advisory = (snapshot.turnover_rate >= self.config.sweet_spot_min
            && snapshot.turnover_rate <= self.config.sweet_spot_max)
            .then_some(SWEET_SPOT_TAG);

        let mut evaluated = Vec::with_capacity(3);

        evaluated.push(FILTER_DEATH_TURNOVER);
        if snapshot.turnover_rate > self.config.death_turnover_threshold {
            debug!(
                instrument = %snapshot.instrument,
                turnover = snapshot.turnover_rate,
                ceiling = self.config.death_turnover_threshold,
                "Circuit breaker: death turnover"
            );
            return FilterOutcome {
                snapshot,
                admitted: false,
                rejected_by: Some(FILTER_DEATH_TURNOVER),
                advisory,
                evaluated,
            };
        }

        evaluated.push(FILTER_VOLUME_RATIO);
        if snapshot.volume_ratio < self.config.min_volume_multiplier {
            debug!(
                instrument = %snapshot.instrument,
                ratio = snapshot.volume_ratio,
                min = self.config.min_volume_multiplier,
                "Rejected: volume ratio below minimum"
            );
            return FilterOutcome {
                snapshot,
                admitted: false,
                rejected_by: Some(FILTER_VOLUME_RATIO),
                advisory,
                evaluated,
            };
        }

        evaluated.push(FILTER_TURNOVER_BAND);
        if snapshot.turnover_rate < self.config.min_turnover_rate
            || snapshot.turnover_rate > self.config.max_turnover_rate
        {
            debug!(
                instrument = %snapshot.instrument,
                turnover = snapshot.turnover_rate,
                band_low = self.config.min_turnover_rate,
                band_high = self.config.max_turnover_rate,
                "Rejected: turnover outside band"
            );
            return FilterOutcome {
                snapshot,
                admitted: false,
                rejected_by: Some(FILTER_TURNOVER_BAND),
                advisory,
                evaluated,
            };
        }

        FilterOutcome {
            snapshot,
            admitted: true,
            rejected_by: None,
            advisory,
            evaluated,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> FilterGateway {
        FilterGateway::new(GatewayConfig::default())
    }

    fn snap_with(turnover: f64, volume_ratio: f64) -> SanitizedSnapshot {
        let mut snap = SanitizedSnapshot::sample();
        snap.turnover_rate = turnover;
        snap.volume_ratio = volume_ratio;
        snap
    }

    #[test]
    fn test_healthy_snapshot_admitted() {
        let outcome = gateway().check(snap_with(10.0, 1.8));
        assert!(outcome.admitted);
        assert!(outcome.rejected_by.is_none());
        assert_eq!(
            outcome.evaluated,
            vec![
                FILTER_DEATH_TURNOVER,
                FILTER_VOLUME_RATIO,
                FILTER_TURNOVER_BAND
            ]
        );
    }

    #[test]
    fn test_death_turnover_short_circuits() {
        // 75% turnover also fails the band check, but the circuit breaker
        // runs first and nothing after it is consulted.
        let outcome = gateway().check(snap_with(75.0, 0.2));
        assert!(!outcome.admitted);
        assert_eq!(outcome.rejected_by, Some(FILTER_DEATH_TURNOVER));
        assert_eq!(outcome.evaluated, vec![FILTER_DEATH_TURNOVER]);
    }

    #[test]
    fn test_death_turnover_threshold_is_exclusive() {
        // Exactly at the ceiling survives the breaker (and then fails the
        // band, which tops out at 60).
        let outcome = gateway().check(snap_with(70.0, 1.5));
        assert_eq!(outcome.rejected_by, Some(FILTER_TURNOVER_BAND));
    }

    #[test]
    fn test_volume_ratio_screen() {
        let outcome = gateway().check(snap_with(10.0, 0.99));
        assert!(!outcome.admitted);
        assert_eq!(outcome.rejected_by, Some(FILTER_VOLUME_RATIO));
        assert_eq!(
            outcome.evaluated,
            vec![FILTER_DEATH_TURNOVER, FILTER_VOLUME_RATIO]
        );
    }

    #[test]
    fn test_volume_ratio_minimum_is_inclusive() {
        let outcome = gateway().check(snap_with(10.0, 1.0));
        assert!(outcome.admitted);
    }

    #[test]
    fn test_turnover_band_bounds_inclusive() {
        assert!(gateway().check(snap_with(5.0, 1.5)).admitted);
        assert!(gateway().check(snap_with(60.0, 1.5)).admitted);
        assert!(!gateway().check(snap_with(4.99, 1.5)).admitted);
        assert!(!gateway().check(snap_with(60.01, 1.5)).admitted);
    }

    #[test]
    fn test_sweet_spot_tag_attached_inclusive() {
        assert_eq!(gateway().check(snap_with(8.0, 1.5)).advisory, Some(SWEET_SPOT_TAG));
        assert_eq!(gateway().check(snap_with(15.0, 1.5)).advisory, Some(SWEET_SPOT_TAG));
        assert_eq!(gateway().check(snap_with(7.99, 1.5)).advisory, None);
        assert_eq!(gateway().check(snap_with(15.01, 1.5)).advisory, None);
    }

    #[test]
    fn test_sweet_spot_tag_independent_of_admission() {
        // In the sweet spot but under the volume-ratio minimum: rejected,
        // still tagged.
        let outcome = gateway().check(snap_with(12.0, 0.5));
        assert!(!outcome.admitted);
        assert_eq!(outcome.advisory, Some(SWEET_SPOT_TAG));
    }

    #[test]
    fn test_reapplication_is_idempotent() {
        let g = gateway();
        let batch = vec![
            snap_with(10.0, 1.8),
            snap_with(75.0, 1.8),
            snap_with(12.0, 0.5),
            snap_with(3.0, 2.0),
        ];
        let (first, _) = g.apply(batch);
        let admitted: Vec<SanitizedSnapshot> = first
            .iter()
            .filter(|o| o.admitted)
            .map(|o| o.snapshot.clone())
            .collect();
        let (second, stats) = g.apply(admitted.clone());
        assert_eq!(stats.admitted, admitted.len() as u64);
        assert!(second.iter().all(|o| o.admitted));
    }

    #[test]
    fn test_apply_preserves_order_and_counts() {
        let batch = vec![
            snap_with(10.0, 1.8),  // admitted, sweet-spot
            snap_with(75.0, 1.8),  // death
            snap_with(10.0, 0.2),  // volume ratio, sweet-spot
            snap_with(3.0, 2.0),   // band
            snap_with(20.0, 1.1),  // admitted
        ];
        let (outcomes, stats) = gateway().apply(batch);
        assert_eq!(outcomes.len(), 5);
        assert_eq!(outcomes[0].snapshot.turnover_rate, 10.0);
        assert_eq!(outcomes[4].snapshot.turnover_rate, 20.0);
        assert_eq!(stats.evaluated, 5);
        assert_eq!(stats.admitted, 2);
        assert_eq!(stats.rejected_death_turnover, 1);
        assert_eq!(stats.rejected_volume_ratio, 1);
        assert_eq!(stats.rejected_turnover_band, 1);
        assert_eq!(stats.sweet_spot_tags, 2);
    }

    #[test]
    fn test_stats_merge() {
        let mut a = GatewayStats {
            evaluated: 3,
            admitted: 1,
            rejected_death_turnover: 1,
            rejected_volume_ratio: 1,
            rejected_turnover_band: 0,
            sweet_spot_tags: 1,
        };
        let b = GatewayStats {
            evaluated: 2,
            admitted: 2,
            rejected_death_turnover: 0,
            rejected_volume_ratio: 0,
            rejected_turnover_band: 0,
            sweet_spot_tags: 1,
        };
        a.merge(&b);
        assert_eq!(a.evaluated, 5);
        assert_eq!(a.admitted, 3);
        assert_eq!(a.sweet_spot_tags, 2);
    }

    #[test]
    fn test_stats_display() {
        let (_, stats) = gateway().apply(vec![snap_with(10.0, 1.8)]);
        let s = format!("{stats}");
        assert!(s.contains("evaluated=1"));
        assert!(s.contains("admitted=1"));
    }

    #[test]
    fn test_outcome_and_stats_serialize_for_reporting() {
        let (outcomes, stats) = gateway().apply(vec![snap_with(75.0, 1.8)]);
        let json = serde_json::to_string(&outcomes[0]).unwrap();
        assert!(json.contains("\"admitted\":false"));
        assert!(json.contains("\"rejected_by\":\"death-turnover\""));
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"evaluated\":1"));
        assert!(json.contains("\"rejected_death_turnover\":1"));
    }
}
