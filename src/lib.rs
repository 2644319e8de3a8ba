//! # Svarog
//!
//! Closed-loop resource controller for a simulated broadcast network.
//!
//! Svarog proposes how to split transmit power and bandwidth between a
//! high-priority emergency pipe and a general coverage pipe, and how much
//! unicast demand to move onto broadcast. Proposals come from a policy,
//! are scored against a coverage digital twin and a unicast congestion
//! model, pass hard safety clamps, and wait for a human before deployment.
//! A drift detector freezes AI control when the twin stops matching the
//! field.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            CLI / heartbeat runtime / embedding service          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                  ControlContext (decision pipeline)             │
//! │  ┌──────────┐  ┌───────────┐  ┌──────────┐  ┌──────────────┐    │
//! │  │  Policy  │─▶│ Optimizer │─▶│   Twin   │─▶│    Safety    │    │
//! │  │ MLP/rule │  │water-fill │  │+ unicast │  │    clamps    │    │
//! │  └──────────┘  └───────────┘  └──────────┘  └──────────────┘    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        Drift detector  ─▶  Approval workflow (human gate)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │      Propagation (Hata + terrain) · datasets · PLP validator    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::unreadable_literal)]
#![allow(clippy::cast_possible_truncation)]  // User counts from ratios
#![allow(clippy::cast_sign_loss)]            // Counts are never negative
#![allow(clippy::cast_precision_loss)]       // Acceptable for stats
#![allow(clippy::suboptimal_flops)]          // Formulas read as written
#![allow(clippy::similar_names)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::use_self)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::many_single_char_names)]    // Water-filling notation

pub mod approval;
pub mod config;
pub mod congestion;
pub mod drift;
pub mod environment;
pub mod error;
pub mod external;
pub mod optimizer;
pub mod pipeline;
pub mod policy;
pub mod propagation;
pub mod runtime;
pub mod safety;
pub mod twin;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::approval::{ApprovalRecord, ApprovalStatus};
    pub use crate::config::Config;
    pub use crate::environment::{EnvironmentState, Hurdle};
    pub use crate::error::{Error, Result};
    pub use crate::pipeline::{ControlContext, ControlMode, KpiReport, ObservedKpis, ProposalOutcome};
    pub use crate::policy::{InferenceMode, PolicyController};
    pub use crate::runtime::{ControlRuntime, RuntimeConfig};
    pub use crate::safety::{SafeConfig, SafetyWarning};
    pub use crate::types::*;
}
