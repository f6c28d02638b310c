//! End-to-end pipeline tests over scripted source chains.
//!
//! Everything here goes through the public surface: build a resolver
//! from mock sources, run a batch, assert on the outcome. No network.

use std::time::Duration;

use chrono::NaiveDate;
use tokio_test::assert_ok;

use spotlight::config::AppConfig;
use spotlight::screen::{ScreenPipeline, ScreenRequest};
use spotlight::sources::SourceResolver;
use spotlight::types::{DecisionTag, OpportunityFactors, ScreenError};

use crate::mock_source::{record, MockSource};

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 25).unwrap()
}

fn pipeline_over(sources: Vec<MockSource>, cfg: &AppConfig) -> ScreenPipeline {
    let handlers = sources
        .into_iter()
        .map(|s| Box::new(s) as Box<dyn spotlight::sources::QuoteSource>)
        .collect();
    let resolver = SourceResolver::new(handlers, Duration::from_secs(5));
    ScreenPipeline::new(resolver, cfg)
}

/// Factors that classify FOCUS and score well above the 0.60 floor.
fn focus_factors(instrument: &str, pattern_quality: f64) -> OpportunityFactors {
    let mut f = OpportunityFactors::neutral(instrument);
    f.pattern_type = Some("platform-breakout".to_string());
    f.pattern_quality = pattern_quality;
    f.breakout_strength = 0.7;
    f.volume_surge = 2.0;
    f.platform_volatility = 0.03;
    f.net_inflow = 30_000_000.0;
    f.inflow_strength = 0.75;
    f.sustained_inflow = true;
    f.sector_risk = 0.2;
    f.market_sentiment = 0.7;
    f.capital_flow_ratio = Some(1.71);
    f.risk_level = 0.1;
    f
}

#[tokio::test]
async fn test_scripted_batch_end_to_end() {
    let pipeline = pipeline_over(vec![MockSource::new("alpha")], &AppConfig::default());

    let requests = vec![
        ScreenRequest::new("600519", focus_factors("600519", 0.8)),
        ScreenRequest::new("000858", focus_factors("000858", 0.6)),
        ScreenRequest::new("300750", focus_factors("300750", 0.8)),
        ScreenRequest::bare("601012"),
        ScreenRequest::bare("002594"),
    ];
    let outcome = pipeline.run_batch(requests, as_of()).await;

    assert_eq!(outcome.screened.len(), 5);
    assert!(outcome.failures.is_empty());

    // Request order survives the batch.
    let codes: Vec<&str> = outcome
        .screened
        .iter()
        .map(|s| s.instrument.as_str())
        .collect();
    assert_eq!(codes, vec!["600519", "000858", "300750", "601012", "002594"]);

    // Admission spread: two in, one per rejection reason.
    let stats = &outcome.gateway_stats;
    assert_eq!(stats.evaluated, 5);
    assert_eq!(stats.admitted, 2);
    assert_eq!(stats.rejected_death_turnover, 1);
    assert_eq!(stats.rejected_volume_ratio, 1);
    assert_eq!(stats.rejected_turnover_band, 1);
    assert_eq!(stats.sweet_spot_tags, 1);

    // Only admitted snapshots get scored and tagged; the overheated one
    // keeps its FOCUS-grade factors but never reaches the classifier.
    assert_eq!(outcome.screened[0].tag, Some(DecisionTag::Focus));
    assert_eq!(outcome.screened[1].tag, Some(DecisionTag::Focus));
    assert_eq!(outcome.screened[2].tag, None);
    assert!(outcome.screened[2].score.is_none());
    assert_eq!(outcome.screened[3].tag, None);
    assert_eq!(outcome.screened[4].tag, None);

    assert_eq!(outcome.screened[0].outcome.advisory, Some("sweet-spot"));
    assert_eq!(outcome.screened[1].outcome.advisory, None);

    // Stronger pattern wins the pick; the runner-up watches.
    let selection = outcome.selection.expect("two eligible FOCUS candidates");
    assert_eq!(selection.primary.instrument, "600519");
    assert_eq!(selection.primary.tag, DecisionTag::Focus);
    assert_eq!(selection.alternates.len(), 1);
    assert_eq!(selection.alternates[0].instrument, "000858");
    assert_eq!(selection.alternates[0].tag, DecisionTag::Watch);
    assert!(selection.primary.composite > selection.alternates[0].composite);

    assert_eq!(pipeline.metrics().attempts_for("alpha"), 5);
}

#[tokio::test]
async fn test_failed_primary_degrades_to_backup() {
    let alpha = MockSource::new("alpha");
    let beta = MockSource::new("beta");
    let alpha_ctl = alpha.controller();
    let beta_ctl = beta.controller();
    let pipeline = pipeline_over(vec![alpha, beta], &AppConfig::default());

    alpha_ctl.set_error("HTTP 500");
    let outcome = pipeline
        .run_batch(vec![ScreenRequest::bare("600519")], as_of())
        .await;
    assert_eq!(outcome.screened[0].source, "beta");
    assert!(outcome.screened[0].degraded);
    assert_eq!(alpha_ctl.calls(), vec!["600519"]);
    assert_eq!(beta_ctl.call_count(), 1);

    // Primary recovers; the next batch goes straight through.
    alpha_ctl.clear_error();
    let outcome = pipeline
        .run_batch(vec![ScreenRequest::bare("600519")], as_of())
        .await;
    assert_eq!(outcome.screened[0].source, "alpha");
    assert!(!outcome.screened[0].degraded);
    assert_eq!(beta_ctl.call_count(), 1);

    let metrics = pipeline.metrics();
    assert_eq!(metrics.attempts_for("alpha"), 2);
    assert_eq!(metrics.attempts_for("beta"), 1);
    assert_eq!(metrics.degraded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_primary_times_out_and_backup_serves() {
    let alpha = MockSource::new("alpha");
    let alpha_ctl = alpha.controller();
    alpha_ctl.set_delay(Duration::from_secs(3600));
    let pipeline = pipeline_over(vec![alpha, MockSource::new("beta")], &AppConfig::default());

    let outcome = pipeline
        .run_batch(vec![ScreenRequest::bare("600519")], as_of())
        .await;
    assert_eq!(outcome.screened[0].source, "beta");
    assert!(outcome.screened[0].degraded);
    assert_eq!(pipeline.metrics().degraded, 1);
}

#[tokio::test]
async fn test_exhausted_instrument_dropped_with_reasons_in_order() {
    // Neither source knows 688001; 600519 still screens normally.
    let subset = || {
        vec![record(
            "600519",
            "x",
            10.0,
            9.5,
            10_000_000.0,
            100_000_000.0,
            5_000_000.0,
        )]
    };
    let pipeline = pipeline_over(
        vec![
            MockSource::with_records("alpha", subset()),
            MockSource::with_records("beta", subset()),
        ],
        &AppConfig::default(),
    );

    let outcome = pipeline
        .run_batch(
            vec![ScreenRequest::bare("600519"), ScreenRequest::bare("688001")],
            as_of(),
        )
        .await;

    assert_eq!(outcome.screened.len(), 1);
    assert_eq!(outcome.screened[0].instrument, "600519");
    assert_eq!(outcome.failures.len(), 1);
    match &outcome.failures[0] {
        ScreenError::SourceExhausted {
            instrument,
            failures,
        } => {
            assert_eq!(instrument, "688001");
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].source, "alpha");
            assert_eq!(failures[1].source, "beta");
            assert!(failures[0].reason.contains("No record for 688001"));
        }
        other => panic!("expected SourceExhausted, got {other:?}"),
    }
    assert_eq!(pipeline.metrics().exhausted, 1);
}

#[tokio::test]
async fn test_config_thresholds_flow_through() {
    // Narrow the advisory band past 600519's 10% turnover and raise the
    // selection floor above any reachable composite.
    let toml = r#"
        [sources]
        order = ["tencent"]
        timeout_secs = 5

        [gateway]
        min_volume_multiplier = 1.0
        min_turnover_rate = 5.0
        max_turnover_rate = 60.0
        death_turnover_threshold = 70.0
        sweet_spot_min = 11.0
        sweet_spot_max = 12.0

        [scoring]
        pattern_weight = 0.40
        capital_weight = 0.40
        risk_weight = 0.20
        min_composite_score = 0.90

        [decision]
        capital_ratio_low = 0.5
        capital_ratio_high = 5.0
        risk_threshold = 0.4
        standard_band_low = 1.0
        standard_band_high = 3.0
    "#;
    let cfg = assert_ok!(AppConfig::from_toml(toml));

    let pipeline = pipeline_over(vec![MockSource::new("alpha")], &cfg);
    let outcome = pipeline
        .run_batch(
            vec![ScreenRequest::new("600519", focus_factors("600519", 0.8))],
            as_of(),
        )
        .await;

    let screened = &outcome.screened[0];
    assert!(screened.outcome.admitted);
    assert_eq!(screened.outcome.advisory, None);
    assert_eq!(screened.tag, Some(DecisionTag::Focus));
    // FOCUS, but the raised floor keeps it out of the pick.
    assert!(outcome.selection.is_none());
}

#[tokio::test]
async fn test_golden_decisions_through_full_pipeline() {
    let records = vec![
        record("600000", "x", 12.0, 11.8, 10_000_000.0, 100_000_000.0, 5_000_000.0),
        record("600004", "x", 8.0, 7.7, 20_000_000.0, 100_000_000.0, 13_000_000.0),
        record("600006", "x", 25.0, 24.0, 30_000_000.0, 100_000_000.0, 25_000_000.0),
        record("600009", "x", 60.0, 55.0, 55_000_000.0, 100_000_000.0, 18_000_000.0),
    ];
    let pipeline = pipeline_over(
        vec![MockSource::with_records("alpha", records)],
        &AppConfig::default(),
    );

    let trace = {
        let mut f = OpportunityFactors::neutral("600000");
        f.capital_flow_ratio = Some(0.0047);
        f
    };
    let blow_off = {
        let mut f = OpportunityFactors::neutral("600004");
        f.capital_flow_ratio = Some(6.5);
        f
    };
    let trapped = {
        let mut f = OpportunityFactors::neutral("600006");
        f.capital_flow_ratio = Some(1.07);
        f.trap_signals = 1;
        f.risk_level = 0.4;
        f
    };
    let clean = focus_factors("600009", 0.8);

    let outcome = pipeline
        .run_batch(
            vec![
                ScreenRequest::new("600000", trace),
                ScreenRequest::new("600004", blow_off),
                ScreenRequest::new("600006", trapped),
                ScreenRequest::new("600009", clean),
            ],
            as_of(),
        )
        .await;

    assert_eq!(outcome.screened[0].tag, Some(DecisionTag::Pass));
    assert_eq!(outcome.screened[1].tag, Some(DecisionTag::Trap));
    assert_eq!(outcome.screened[2].tag, Some(DecisionTag::Block));
    assert_eq!(outcome.screened[3].tag, Some(DecisionTag::Focus));

    let selection = outcome.selection.expect("one FOCUS candidate");
    assert_eq!(selection.primary.instrument, "600009");
    assert!(selection.alternates.is_empty());
}

#[tokio::test]
async fn test_neutral_batch_has_no_pick() {
    let pipeline = pipeline_over(vec![MockSource::new("alpha")], &AppConfig::default());
    let outcome = pipeline
        .run_batch(
            vec![ScreenRequest::bare("600519"), ScreenRequest::bare("000858")],
            as_of(),
        )
        .await;

    for screened in &outcome.screened {
        assert_eq!(screened.tag, Some(DecisionTag::Pass));
    }
    assert!(outcome.selection.is_none());
}
