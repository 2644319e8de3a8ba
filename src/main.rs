//! Svarog CLI - closed-loop broadcast resource controller.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use tokio::signal;
use tracing::warn;

use svarog::approval::ApprovalStatus;
use svarog::cli::*;
use svarog::config::{init_logging, Config};
use svarog::environment::Hurdle;
use svarog::error::{Error, Result};
use svarog::pipeline::{ControlContext, ControlMode, KpiReport, ProposalOutcome};
use svarog::policy::InferenceMode;
use svarog::runtime::ControlRuntime;
use svarog::types::{Action, Intent, RecordId};
use svarog::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config if specified
    let mut config = if let Some(ref path) = cli.config {
        Config::load(path)?
    } else if Config::default_path().exists() {
        Config::load(Config::default_path())?
    } else {
        Config::default()
    };

    config.logging.level = cli.log_level.clone();
    config.logging.color = config.logging.color && !cli.no_color;
    init_logging(&config.logging)?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.format;
    match cli.command {
        Commands::Run(args) => run_loop(args, config, format).await,
        Commands::Propose(args) => run_propose(args, config, format),
        Commands::Hurdle(args) => run_hurdle(args, config, format),
        Commands::Evaluate(args) => run_evaluate(args, config, format),
        Commands::Config(args) => run_config(args, &config, cli.config.is_some()),
    }
}

/// Build a context from configuration and shared command options.
fn build_context(args: &ContextArgs, mut config: Config) -> Result<ControlContext> {
    if let Some(kind) = args.policy {
        config.policy.kind = kind.into();
    }
    if let Some(seed) = args.seed {
        config.twin.seed = Some(seed);
        config.congestion.seed = Some(seed);
        config.policy.seed = Some(seed);
        config.runtime.seed = Some(seed);
    }
    if args.hour.is_some() {
        config.control.hour_of_day = args.hour;
    }

    let ctx = ControlContext::new(&config)?;
    for &hurdle in &args.hurdles {
        ctx.apply_hurdle(hurdle.into());
    }
    Ok(ctx)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize output: {e}")))?;
    println!("{json}");
    Ok(())
}

fn banner(title: &str) {
    println!("{}", "╔══════════════════════════════════════════╗".bright_cyan());
    println!("{}", format!("║     {title:<37}║").bright_cyan());
    println!("{}", format!("║     Version {VERSION:<29}║").bright_cyan());
    println!("{}", "╚══════════════════════════════════════════╝".bright_cyan());
    println!();
}

fn mode_label(mode: ControlMode) -> ColoredString {
    match mode {
        ControlMode::Active => mode.to_string().green(),
        ControlMode::AiFrozen => mode.to_string().red().bold(),
    }
}

fn print_kpis(kpis: &KpiReport) {
    println!("{}", "KPIs:".bright_white().bold());
    println!(
        "  Coverage:           {:.1}% (static {:.1}%, mobile {:.1}%)",
        kpis.coverage_pct, kpis.static_coverage_pct, kpis.mobile_coverage_pct
    );
    println!("  Alert reliability:  {:.1}%", kpis.alert_reliability * 100.0);
    println!(
        "  SNR:                avg {:.1} dB, min {:.1} dB",
        kpis.avg_snr_db, kpis.min_snr_db
    );
    println!("  Spectral eff.:      {:.2} bit/s/Hz", kpis.spectral_efficiency);
    println!(
        "  Congestion:         {:.2} -> {:.2} ({} users offloaded)",
        kpis.unicast_congestion, kpis.effective_congestion, kpis.users_offloaded
    );
    println!(
        "  Latency / loss:     {:.0} ms / {:.2}%",
        kpis.latency_ms,
        kpis.packet_loss * 100.0
    );
    println!(
        "  Weights:            emergency {:.2}, coverage {:.2}, offload {:.2}",
        kpis.emergency_weight, kpis.coverage_weight, kpis.offload_ratio
    );
    println!("  Reward:             {:.3}", kpis.reward);
}

fn print_outcome(outcome: &ProposalOutcome) {
    println!(
        "  {} {}   {} {}",
        "Intent:".bright_white(),
        outcome.intent,
        "Mode:".bright_white(),
        mode_label(outcome.status)
    );
    println!(
        "  {} confidence {:.2}, value {:.3}",
        "Policy:".bright_white(),
        outcome.policy.confidence,
        outcome.policy.value
    );
    println!(
        "  {} Δemergency {:+.3}, Δcoverage {:+.3}, offload {:.2}",
        "Proposed:".bright_white(),
        outcome.action.delta_emergency_weight,
        outcome.action.delta_coverage_weight,
        outcome.action.offload_ratio
    );
    println!(
        "  {} Δemergency {:+.3}, Δcoverage {:+.3}, offload {:.2}",
        "Safe:".bright_white(),
        outcome.safe_action.delta_emergency_weight,
        outcome.safe_action.delta_coverage_weight,
        outcome.safe_action.offload_ratio
    );
    println!();

    println!("{}", "Slices:".bright_white().bold());
    for slice in &outcome.config.slices {
        println!(
            "  {} {:<10} {:<6} {:<4} {:.2} MHz",
            "●".cyan(),
            slice.kind.to_string(),
            slice.modcod.modulation.as_str(),
            slice.modcod.coding_rate.as_str(),
            slice.bandwidth_mhz
        );
    }
    println!("  Power {:.1} dBm at {:.0} MHz", outcome.config.power_dbm, outcome.config.frequency_mhz);
    println!();

    print_kpis(&outcome.kpis);
    println!();

    let drift = &outcome.drift;
    let verdict = if drift.is_drifting { "drifting".red() } else { "stable".green() };
    println!(
        "{} {} (score {:.2}, confidence {:.2}, {} samples)",
        "Drift:".bright_white().bold(),
        verdict,
        drift.composite_score,
        drift.confidence,
        drift.sample_count
    );

    if !outcome.warnings.is_empty() {
        println!();
        println!("{}", "Warnings:".yellow().bold());
        for warning in &outcome.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }
}

/// Run the heartbeat and receiver worker until Ctrl+C or the deadline.
async fn run_loop(args: RunArgs, mut config: Config, format: OutputFormat) -> Result<()> {
    if let Some(secs) = args.interval {
        config.runtime.heartbeat_interval = Duration::from_secs(secs.max(1));
    }
    if let Some(ref intent) = args.intent {
        config.runtime.heartbeat_intent = Intent::from_text(intent);
    }
    let runtime_config = config.runtime.clone();
    let ctx = Arc::new(build_context(&args.context, config)?);

    if format == OutputFormat::Text {
        banner("SVAROG CONTROL LOOP");
        println!(
            "  {} {}   {} {:?}   {} {}",
            "Policy:".bright_white(),
            ctx.policy_name(),
            "Heartbeat:".bright_white(),
            runtime_config.heartbeat_interval,
            "Intent:".bright_white(),
            runtime_config.heartbeat_intent
        );
        println!();
        println!("{} Control loop running. Press Ctrl+C to stop.", "●".green());
    }

    let runtime = ControlRuntime::start(Arc::clone(&ctx), runtime_config);

    match args.duration {
        Some(secs) => {
            tokio::select! {
                result = signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!("Failed to listen for Ctrl+C: {}", e);
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C, stopping: {}", e);
            }
        }
    }

    runtime.shutdown().await?;

    let pending = ctx.list_pending();
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "mode": ctx.mode(),
            "baseline": ctx.baseline(),
            "drift": ctx.drift_status(),
            "pending": pending,
        }))?,
        OutputFormat::Text => {
            println!();
            println!(
                "{} Control loop stopped in mode {}.",
                "●".yellow(),
                mode_label(ctx.mode())
            );
            println!("  {} proposal(s) awaiting human approval", pending.len());
            for record in pending.iter().rev().take(5) {
                println!(
                    "  {} {} {} ({})",
                    "○".dimmed(),
                    record.id,
                    record.intent,
                    record.created_at.format("%H:%M:%S")
                );
            }
        }
    }

    Ok(())
}

/// One decision cycle, optionally followed by a human decision.
fn run_propose(args: ProposeArgs, mut config: Config, format: OutputFormat) -> Result<()> {
    if args.deterministic {
        config.policy.mode = InferenceMode::Deterministic;
    }
    let ctx = build_context(&args.context, config)?;
    let intent = Intent::from_text(&args.intent);
    let outcome = ctx.propose_and_validate(intent)?;

    let note = args.note.as_deref();
    // Records held open by an emergency need review before an ordinary decision.
    let review = |id: RecordId, actor: &str| -> Result<()> {
        if ctx.record(id).is_some_and(|r| r.status == ApprovalStatus::AiRecommended) {
            ctx.submit(id, actor)?;
        }
        Ok(())
    };
    let decision = match (outcome.approval_record_id, &args.approve, &args.reject, &args.emergency_override) {
        (Some(id), Some(actor), _, _) => {
            review(id, actor)?;
            Some(ctx.approve(id, actor, note)?)
        }
        (Some(id), _, Some(actor), _) => {
            review(id, actor)?;
            Some(ctx.reject(id, actor, note)?)
        }
        (Some(id), _, _, Some(actor)) => Some(ctx.emergency_override(id, actor, note)?),
        (None, Some(_), _, _) | (None, _, Some(_), _) | (None, _, _, Some(_)) => {
            return Err(Error::UnsafeState(
                "AI control is frozen: no proposal was queued for a decision".into(),
            ));
        }
        _ => None,
    };

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "outcome": outcome,
            "record": decision.or_else(|| outcome.approval_record_id.and_then(|id| ctx.record(id))),
        })),
        OutputFormat::Text => {
            banner("SVAROG PROPOSAL");
            print_outcome(&outcome);
            println!();
            match (outcome.approval_record_id, decision) {
                (_, Some(record)) => println!(
                    "{} Record {} is now {}",
                    "✓".green(),
                    record.id,
                    record.status.to_string().bright_white()
                ),
                (Some(id), None) => println!(
                    "{} Record {} awaits human approval",
                    "○".yellow(),
                    id
                ),
                (None, None) => println!("{} Proposal held for human review", "✗".red()),
            }
            Ok(())
        }
    }
}

/// Apply a hurdle and compare the deployed configuration before and after.
fn run_hurdle(args: HurdleArgs, config: Config, format: OutputFormat) -> Result<()> {
    let ctx = build_context(&args.context, config)?;
    let intent = Intent::from_text(&args.intent);
    let deployed = Action::new(0.0, 0.0, ctx.baseline().offload_ratio);

    let before = ctx.evaluate(&deployed, intent)?;
    let hurdle = Hurdle::from(args.name);
    let description = ctx.apply_hurdle(hurdle);
    let after = ctx.evaluate(&deployed, intent)?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "hurdle": hurdle,
            "description": description,
            "environment": ctx.environment(),
            "before": before,
            "after": after,
        })),
        OutputFormat::Text => {
            banner("SVAROG HURDLE");
            println!("  {} {}", hurdle.to_string().bright_white().bold(), description);
            println!();
            println!("{}", "Deployed configuration:".bright_white().bold());
            let before_map = before.to_map();
            for (key, value) in after.to_map() {
                let old = before_map.get(key).copied().unwrap_or(value);
                let delta = value - old;
                let marker = if delta.abs() < 1e-9 {
                    "=".dimmed()
                } else if delta > 0.0 {
                    "▲".green()
                } else {
                    "▼".red()
                };
                println!("  {marker} {key:<22} {old:>10.3} -> {value:>10.3}");
            }
            Ok(())
        }
    }
}

/// Score an explicit action.
fn run_evaluate(args: EvaluateArgs, config: Config, format: OutputFormat) -> Result<()> {
    let ctx = build_context(&args.context, config)?;
    let intent = Intent::from_text(&args.intent);
    let action = Action::new(args.delta_emergency, args.delta_coverage, args.offload);
    let report = ctx.evaluate(&action, intent)?;

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            banner("SVAROG EVALUATION");
            print_kpis(&report);
            Ok(())
        }
    }
}

/// Print an example configuration or validate the active one.
fn run_config(args: ConfigArgs, active: &Config, explicit: bool) -> Result<()> {
    if args.check {
        active.validate()?;
        let source = if explicit { "given file" } else { "defaults" };
        println!("{} Configuration is valid ({})", "✓".green(), source);
        return Ok(());
    }

    let output = toml::to_string_pretty(&Config::example())
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &output)?;
        println!(
            "{} Configuration written to {}",
            "✓".green(),
            path.display()
        );
    } else {
        println!("{}", output);
    }

    Ok(())
}
