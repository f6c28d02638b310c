//! SPOTLIGHT — A-share daily candidate screening pipeline
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the source chain from config, and screens the instruments
//! named on the command line for today's session.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use spotlight::config;
use spotlight::screen::{BatchOutcome, ScreenPipeline, ScreenRequest};
use spotlight::sources::sina::SinaSource;
use spotlight::sources::tencent::TencentSource;
use spotlight::sources::tushare::TushareSource;
use spotlight::sources::{QuoteSource, SourceResolver};
use spotlight::types::OpportunityFactors;

const BANNER: &str = r#"
 ____  ____   ___ _____ _     ___ ____ _   _ _____
/ ___||  _ \ / _ \_   _| |   |_ _/ ___| | | |_   _|
\___ \| |_) | | | || | | |    | | |  _| |_| | | |
 ___) |  __/| |_| || | | |___ | | |_| |  _  | | |
|____/|_|    \___/ |_| |_____|___\____|_| |_| |_|

  Turnover, capital flow, and pattern screening for A-shares
  v0.1.0 — one pick a day
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        sources = ?cfg.sources.order,
        timeout_secs = cfg.sources.timeout_secs,
        min_composite = cfg.scoring.min_composite_score,
        "SPOTLIGHT starting up"
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (instruments, factors_path) = parse_args(&args)?;
    if instruments.is_empty() {
        eprintln!("Usage: spotlight [--factors factors.json] <instrument>...");
        eprintln!("Example: spotlight --factors factors.json 600519 000858 300750");
        std::process::exit(2);
    }

    // -- Build the pipeline ----------------------------------------------

    let handlers = build_handlers(&cfg)?;
    let resolver = SourceResolver::new(handlers, Duration::from_secs(cfg.sources.timeout_secs));
    let pipeline = ScreenPipeline::new(resolver, &cfg);

    let factors = load_factors(factors_path.as_deref())?;
    let requests: Vec<ScreenRequest> = instruments
        .iter()
        .map(|code| match factors.get(code) {
            Some(f) => ScreenRequest::new(code, f.clone()),
            None => ScreenRequest::bare(code),
        })
        .collect();

    // -- Screen today's session ------------------------------------------

    let as_of = chrono::Local::now().date_naive();
    let outcome = pipeline.run_batch(requests, as_of).await;

    render(&outcome);
    info!(metrics = %pipeline.metrics(), "Source chain counters");

    Ok(())
}

/// Split argv into instrument codes and the optional factors file.
fn parse_args(args: &[String]) -> Result<(Vec<String>, Option<String>)> {
    let mut instruments = Vec::new();
    let mut factors_path = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--factors" => {
                factors_path = Some(
                    iter.next()
                        .context("--factors needs a file path")?
                        .clone(),
                );
            }
            other if other.starts_with('-') => bail!("Unknown flag: {other}"),
            code => instruments.push(code.to_string()),
        }
    }
    Ok((instruments, factors_path))
}

/// Instantiate the source chain in configured priority order.
fn build_handlers(cfg: &config::AppConfig) -> Result<Vec<Box<dyn QuoteSource>>> {
    let mut handlers: Vec<Box<dyn QuoteSource>> = Vec::new();
    for name in &cfg.sources.order {
        match name.as_str() {
            "tencent" => handlers.push(Box::new(TencentSource::new()?)),
            "sina" => handlers.push(Box::new(SinaSource::new()?)),
            "tushare" => handlers.push(Box::new(TushareSource::from_env()?)),
            other => bail!("Unknown source handler in config: {other}"),
        }
    }
    Ok(handlers)
}

/// Read the optional enrichment dump: a JSON array of per-instrument
/// factors. Instruments not in the file screen with neutral factors.
fn load_factors(path: Option<&str>) -> Result<HashMap<String, OpportunityFactors>> {
    let Some(path) = path else {
        return Ok(HashMap::new());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read factors file {path}"))?;
    let list: Vec<OpportunityFactors> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse factors file {path}"))?;
    info!(count = list.len(), path, "Loaded enrichment factors");
    Ok(list.into_iter().map(|f| (f.instrument.clone(), f)).collect())
}

/// Print the per-instrument table, the gateway tally, and the day's pick.
fn render(outcome: &BatchOutcome) {
    println!("\n  Screen results for {} (run {})", outcome.as_of, outcome.run_id);
    println!("  {:-<76}", "");
    for s in &outcome.screened {
        let composite = s
            .score
            .as_ref()
            .map(|sc| format!("{:.2}", sc.composite))
            .unwrap_or_else(|| "-".to_string());
        let tag = s.tag.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string());
        let verdict = if s.outcome.admitted {
            "admitted"
        } else {
            s.outcome.rejected_by.unwrap_or("rejected")
        };
        let advisory = s.outcome.advisory.unwrap_or("");
        let degraded = if s.degraded { " [degraded]" } else { "" };
        println!(
            "  {:<10} {:<9} {:>5}  {:<15} {:<6} {:<10}{}",
            s.instrument, s.source, composite, verdict, tag, advisory, degraded,
        );
    }
    for failure in &outcome.failures {
        println!("  ! {failure}");
    }
    println!("  {:-<76}", "");
    println!("  Gateway: {}", outcome.gateway_stats);
    match &outcome.selection {
        Some(selection) => println!("  Pick: {selection}"),
        None => println!("  Pick: none today"),
    }
    println!();
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("spotlight=info"));

    let json_logging = std::env::var("SPOTLIGHT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
