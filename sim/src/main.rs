//! LLMSim - LLM API simulation observability core
//!
//! CLI entry point for driving synthetic traffic and inspecting the metrics.

use std::fs;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use llmsim::cli::{Cli, Command, OutputFormat, get_log_dir};
use llmsim::config::Config;
use llmsim::metrics::Percentiles;
use llmsim::{Observability, ObservabilitySnapshot, SimulationReport, run_simulation};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = get_log_dir();
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("llmsim.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Simulate {
            requests,
            concurrency,
            error_rate,
            seed,
            format,
        } => {
            let mut config = config;
            if let Some(requests) = requests {
                config.simulation.requests = requests;
            }
            if let Some(concurrency) = concurrency {
                config.simulation.concurrency = concurrency;
            }
            if let Some(error_rate) = error_rate {
                config.simulation.error_rate = error_rate;
            }
            if seed.is_some() {
                config.simulation.seed = seed;
            }
            cmd_simulate(&config, format).await
        }
        Command::Config => cmd_config(&config),
    }
}

/// Combined output of `llmsim simulate --format json`
#[derive(Serialize)]
struct SimulateOutput<'a> {
    report: &'a SimulationReport,
    metrics: &'a ObservabilitySnapshot,
}

async fn cmd_simulate(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_simulate: called");
    let observability = Observability::new(config).context("Failed to build observability pipeline")?;
    observability.start().context("Failed to start event bus")?;

    let report = run_simulation(&observability, &config.simulation).await?;
    observability
        .shutdown(true)
        .await
        .context("Failed to stop event bus")?;
    let snapshot = observability.snapshot();

    match format {
        OutputFormat::Json => {
            let output = SimulateOutput {
                report: &report,
                metrics: &snapshot,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => print_text(&report, &snapshot),
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn fmt_percentiles(p: Option<&Percentiles>, unit: &str) -> String {
    match p {
        Some(p) => format!(
            "p50 {:.1}{unit}  p90 {:.1}{unit}  p99 {:.1}{unit}  (n={})",
            p.p50, p.p90, p.p99, p.count
        ),
        None => "no samples".dimmed().to_string(),
    }
}

fn print_text(report: &SimulationReport, snapshot: &ObservabilitySnapshot) {
    println!("{}", "Simulation".bold());
    println!(
        "  {} requests ({} ok, {} failed, {} streamed) in {}ms, seed {}",
        report.requests, report.succeeded, report.failed, report.streamed, report.elapsed_ms, report.seed
    );

    let slo = &snapshot.slo;
    println!("\n{}", "SLO".bold());
    let verdict = if slo.slo_violated {
        "VIOLATED".red().bold()
    } else {
        "OK".green().bold()
    };
    println!("  target {:.3}%  success {:.3}%  {}", slo.slo * 100.0, slo.current_success_rate * 100.0, verdict);
    println!(
        "  error budget {}/{} consumed, {} remaining, burn rate {:.2}",
        slo.error_budget_consumed, slo.error_budget_total, slo.error_budget_remaining, slo.burn_rate
    );
    for (endpoint, rate) in &slo.endpoint_error_rates {
        println!("  {:<24} {:.2}% errors", endpoint, rate * 100.0);
    }

    let streaming = &snapshot.streaming;
    println!("\n{}", "Streaming".bold());
    println!("  ttft        {}", fmt_percentiles(streaming.ttft.as_ref(), "ms"));
    println!("  inter-token {}", fmt_percentiles(streaming.inter_token.as_ref(), "ms"));
    println!("  tokens/sec  {}", fmt_percentiles(streaming.tokens_per_second.as_ref(), ""));

    let cost = &snapshot.cost;
    println!("\n{}", "Cost".bold());
    println!("  total ${:.4} over {} tokens", cost.total_cost, cost.total_tokens);
    for (model, spend) in &cost.by_model {
        println!("  {:<24} ${:.4} ({} requests)", model, spend.cost, spend.requests);
    }
    for budget in &cost.budgets {
        let state = if budget.exceeded {
            "exceeded".red()
        } else {
            "ok".green()
        };
        println!(
            "  budget {:<17} ${:.4} / ${:.4} ({}) {}",
            budget.name, budget.consumed, budget.ceiling, budget.period, state
        );
    }

    let bus = &snapshot.bus;
    println!("\n{}", "Event bus".bold());
    println!(
        "  published {}  delivered {}  failed {}  dropped {}  peak depth {}",
        bus.published, bus.delivered, bus.failed, bus.dropped, bus.peak_queue_depth
    );
}
