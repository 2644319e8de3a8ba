//! Error types for Svarog.

use std::io;

use thiserror::Error;

use crate::approval::ApprovalStatus;
use crate::types::RecordId;

/// Result type alias for Svarog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Svarog.
#[derive(Error, Debug)]
pub enum Error {
    // Input validation errors
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unknown hurdle: {0}")]
    UnknownHurdle(String),

    // Safety errors
    #[error("unsafe state: {0}")]
    UnsafeState(String),

    // Allocation errors
    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    // Workflow errors
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("approval record {0} not found")]
    RecordNotFound(RecordId),

    // Collaborator errors
    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("protocol validation failed: {0}")]
    ProtocolValidation(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Spectrum allocation failures. Each variant names the constraint that
/// could not be satisfied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    #[error("no slices requested")]
    NoSlices,

    #[error("too many slices: {requested} requested, at most {max} supported")]
    TooManySlices { requested: usize, max: usize },

    #[error("bandwidth budget exceeded: slices need {required_mhz:.2} MHz, {available_mhz:.2} MHz available")]
    BandwidthBudget {
        required_mhz: f64,
        available_mhz: f64,
    },

    #[error("power budget must be finite and positive, got {0} mW")]
    PowerBudget(f64),

    #[error("slice {slice}: {reason}")]
    InvalidSlice { slice: String, reason: String },
}

/// Approval workflow integrity errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("record {id} is terminal ({status}), history is immutable")]
    TerminalRecord { id: RecordId, status: ApprovalStatus },

    #[error("transition {from} -> {to} is not permitted")]
    InvalidTransition {
        from: ApprovalStatus,
        to: ApprovalStatus,
    },

    #[error("emergency override requires an active emergency")]
    OverrideNotPermitted,
}

impl Error {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Dataset(_))
    }

    /// Check if this error was caused by caller input.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter(_) | Self::UnknownHurdle(_) | Self::UnsafeState(_)
        )
    }
}
