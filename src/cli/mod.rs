//! Command-line interface for Svarog.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::policy::PolicyKind;

/// Svarog - closed-loop broadcast resource controller
#[derive(Parser, Debug)]
#[command(
    name = "svarog",
    author,
    version,
    about = "Closed-loop broadcast resource controller with mandatory human approval",
    long_about = r#"
Svarog proposes broadcast resource adjustments for a simulated network:

  - Water-filling power and bandwidth allocation across PLP slices
  - Coverage digital twin with static and mobile receivers
  - Unicast congestion model with broadcast offload
  - Hard safety clamps (power ceiling, authorised bands, robust alerts)
  - Drift detection that freezes AI control until a human steps in

Every proposal passes an approval workflow before it is deployed.

QUICK START:
  Propose:   svarog propose --intent "maximize coverage"
  Stress:    svarog propose --hurdle interference --hurdle traffic_surge
  Loop:      svarog run --interval 5
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the heartbeat and receiver feedback until interrupted
    Run(RunArgs),

    /// Run one decision cycle and optionally act on the proposal
    Propose(ProposeArgs),

    /// Apply a hurdle and show its effect on the deployed configuration
    Hurdle(HurdleArgs),

    /// Evaluate an explicit action against the twin
    Evaluate(EvaluateArgs),

    /// Show example configuration
    Config(ConfigArgs),
}

/// Options shared by commands that build a control context.
#[derive(Args, Debug, Clone)]
pub struct ContextArgs {
    /// Hurdles applied before anything else (can be specified multiple times)
    #[arg(long = "hurdle", value_name = "NAME")]
    pub hurdles: Vec<HurdleChoice>,

    /// Policy controller
    #[arg(long)]
    pub policy: Option<PolicyChoice>,

    /// Seed for every stochastic component
    #[arg(long)]
    pub seed: Option<u64>,

    /// Fixed hour of day for the congestion model
    #[arg(long)]
    pub hour: Option<f64>,
}

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// Heartbeat interval in seconds
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Operator intent for unattended cycles
    #[arg(long)]
    pub intent: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,
}

/// Propose command arguments
#[derive(Args, Debug)]
pub struct ProposeArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// Operator intent (free text)
    #[arg(short, long, default_value = "balanced")]
    pub intent: String,

    /// Use the policy mean instead of sampling
    #[arg(long)]
    pub deterministic: bool,

    /// Approve and deploy the proposal as this engineer
    #[arg(long, value_name = "ACTOR", conflicts_with_all = ["reject", "emergency_override"])]
    pub approve: Option<String>,

    /// Reject the proposal as this engineer
    #[arg(long, value_name = "ACTOR", conflicts_with = "emergency_override")]
    pub reject: Option<String>,

    /// Deploy without review (requires an active emergency)
    #[arg(long, value_name = "ACTOR")]
    pub emergency_override: Option<String>,

    /// Note recorded with the decision
    #[arg(long)]
    pub note: Option<String>,
}

/// Hurdle command arguments
#[derive(Args, Debug)]
pub struct HurdleArgs {
    /// Hurdle name
    pub name: HurdleChoice,

    #[command(flatten)]
    pub context: ContextArgs,

    /// Intent used to score the configuration
    #[arg(short, long, default_value = "balanced")]
    pub intent: String,
}

/// Evaluate command arguments
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// Change to the emergency slice weight
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub delta_emergency: f64,

    /// Change to the coverage slice weight
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub delta_coverage: f64,

    /// Share of unicast users moved to broadcast
    #[arg(long, default_value = "0")]
    pub offload: f64,

    /// Intent used to score the action
    #[arg(short, long, default_value = "balanced")]
    pub intent: String,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Validate the active configuration instead of printing an example
    #[arg(long)]
    pub check: bool,

    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Policy controller choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyChoice {
    /// Gaussian MLP (trained weights or seeded)
    Mlp,
    /// Deterministic rules
    Heuristic,
}

impl From<PolicyChoice> for PolicyKind {
    fn from(choice: PolicyChoice) -> Self {
        match choice {
            PolicyChoice::Mlp => Self::Mlp,
            PolicyChoice::Heuristic => Self::Heuristic,
        }
    }
}

/// Hurdle choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum HurdleChoice {
    CoverageDrop,
    Interference,
    SpectrumReduction,
    TrafficSurge,
    EmergencyEscalation,
}

impl From<HurdleChoice> for crate::environment::Hurdle {
    fn from(choice: HurdleChoice) -> Self {
        match choice {
            HurdleChoice::CoverageDrop => Self::CoverageDrop,
            HurdleChoice::Interference => Self::Interference,
            HurdleChoice::SpectrumReduction => Self::SpectrumReduction,
            HurdleChoice::TrafficSurge => Self::TrafficSurge,
            HurdleChoice::EmergencyEscalation => Self::EmergencyEscalation,
        }
    }
}
