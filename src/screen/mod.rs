//! Screening pipeline.
//!
//! Stages, in order: source resolution, sanitation, admission filtering,
//! opportunity scoring, terminal classification, daily selection. Each
//! stage is pure given its config snapshot; `ScreenPipeline` owns one
//! instance of each and fans a batch out across instruments.

pub mod classify;
pub mod filter;
pub mod sanitize;
pub mod score;

pub use classify::DecisionClassifier;
pub use filter::{FilterGateway, FilterOutcome, GatewayStats};
pub use sanitize::sanitize;
pub use score::OpportunityScorer;

use std::cmp::Ordering;

use chrono::NaiveDate;
use futures::future;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::sources::{MetricsSnapshot, SourceResolver};
use crate::types::{
    DailySelection, DecisionTag, OpportunityFactors, SanitizedSnapshot, ScoreResult, ScreenError,
    SelectionEntry,
};

/// Alternates carried behind the primary pick.
const MAX_ALTERNATES: usize = 3;

// ---------------------------------------------------------------------------
// Request / outcome types
// ---------------------------------------------------------------------------

/// One instrument to screen, paired with its enrichment factors.
#[derive(Debug, Clone)]
pub struct ScreenRequest {
    pub instrument: String,
    pub factors: OpportunityFactors,
}

impl ScreenRequest {
    pub fn new(instrument: &str, factors: OpportunityFactors) -> Self {
        ScreenRequest {
            instrument: instrument.to_string(),
            factors,
        }
    }

    /// Request with neutral factors, for instruments with no enrichment.
    pub fn bare(instrument: &str) -> Self {
        Self::new(instrument, OpportunityFactors::neutral(instrument))
    }
}

/// Everything the pipeline decided about one resolved instrument.
#[derive(Debug, Clone)]
pub struct ScreenedInstrument {
    pub instrument: String,
    /// Source that actually supplied the record.
    pub source: String,
    /// A higher-priority source was skipped over.
    pub degraded: bool,
    pub outcome: FilterOutcome,
    /// Present only when the snapshot was admitted and valid.
    pub score: Option<ScoreResult>,
    pub tag: Option<DecisionTag>,
}

/// Result of one batch run.
#[derive(Debug)]
pub struct BatchOutcome {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    /// Per-instrument results, in request order (skipping failed resolutions).
    pub screened: Vec<ScreenedInstrument>,
    /// Exhausted resolutions; these instruments were dropped, never faked.
    pub failures: Vec<ScreenError>,
    pub gateway_stats: GatewayStats,
    pub selection: Option<DailySelection>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Wires resolver, gateway, scorer, and classifier together.
pub struct ScreenPipeline {
    resolver: SourceResolver,
    gateway: FilterGateway,
    scorer: OpportunityScorer,
    classifier: DecisionClassifier,
}

impl ScreenPipeline {
    pub fn new(resolver: SourceResolver, config: &AppConfig) -> Self {
        ScreenPipeline {
            resolver,
            gateway: FilterGateway::new(config.gateway.clone()),
            scorer: OpportunityScorer::new(config.scoring.clone()),
            classifier: DecisionClassifier::new(config.decision.clone()),
        }
    }

    /// Screen a batch of instruments for one trade date.
    ///
    /// Resolutions run concurrently; everything downstream of resolution is
    /// synchronous. An instrument whose sources are all exhausted is
    /// dropped from the batch and its error collected — a partial batch is
    /// an honest batch.
    pub async fn run_batch(&self, requests: Vec<ScreenRequest>, as_of: NaiveDate) -> BatchOutcome {
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            %as_of,
            instruments = requests.len(),
            "Screen batch started"
        );

        let resolutions = future::join_all(
            requests
                .iter()
                .map(|req| self.resolver.resolve(&req.instrument, as_of)),
        )
        .await;

        let mut failures = Vec::new();
        let mut resolved = Vec::new();
        for (request, resolution) in requests.iter().zip(resolutions) {
            match resolution {
                Ok(res) => resolved.push((request, res)),
                Err(err) => {
                    warn!(%run_id, error = %err, "Instrument dropped from batch");
                    failures.push(err);
                }
            }
        }

        let snapshots: Vec<SanitizedSnapshot> = resolved
            .iter()
            .map(|(_, res)| sanitize(&res.record))
            .collect();
        let (outcomes, gateway_stats) = self.gateway.apply(snapshots);

        let mut screened = Vec::with_capacity(outcomes.len());
        for ((request, resolution), outcome) in resolved.into_iter().zip(outcomes) {
            // Admission and validity both gate the expensive stages; a
            // rejected or damaged snapshot carries no score and no tag.
            let (score, tag) = if outcome.admitted && outcome.snapshot.is_valid {
                let score = self.scorer.score(&request.factors);
                let tag = self.classifier.classify(&request.factors);
                (Some(score), Some(tag))
            } else {
                (None, None)
            };
            screened.push(ScreenedInstrument {
                instrument: request.instrument.clone(),
                source: resolution.source,
                degraded: resolution.degraded,
                outcome,
                score,
                tag,
            });
        }

        let selection = self.select(&screened, as_of);
        info!(
            %run_id,
            screened = screened.len(),
            dropped = failures.len(),
            admitted = gateway_stats.admitted,
            selected = selection.is_some(),
            "Screen batch finished"
        );

        BatchOutcome {
            run_id,
            as_of,
            screened,
            failures,
            gateway_stats,
            selection,
        }
    }

    /// Pick the day's primary candidate and up to three alternates.
    ///
    /// Pool: admitted instruments tagged FOCUS whose composite clears the
    /// eligibility threshold, ordered by composite descending (stable, so
    /// ties keep batch order). The runner-ups are re-tagged WATCH: their
    /// standing depends on the pool, not on their own guards.
    pub fn select(
        &self,
        screened: &[ScreenedInstrument],
        as_of: NaiveDate,
    ) -> Option<DailySelection> {
        let min = self.scorer.min_composite();
        let mut pool: Vec<(&ScreenedInstrument, f64)> = screened
            .iter()
            .filter(|s| s.outcome.admitted && s.tag == Some(DecisionTag::Focus))
            .filter_map(|s| {
                s.score
                    .as_ref()
                    .filter(|score| score.is_eligible(min))
                    .map(|score| (s, score.composite))
            })
            .collect();
        pool.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let mut ranked = pool.into_iter().map(|(s, composite)| SelectionEntry {
            instrument: s.instrument.clone(),
            composite,
            tag: DecisionTag::Focus,
        });

        let primary = ranked.next()?;
        let alternates: Vec<SelectionEntry> = ranked
            .take(MAX_ALTERNATES)
            .map(|mut entry| {
                entry.tag = DecisionTag::Watch;
                entry
            })
            .collect();

        Some(DailySelection {
            as_of,
            primary,
            alternates,
        })
    }

    /// Resolver counter snapshot, for end-of-run reporting.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.resolver.metrics()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
