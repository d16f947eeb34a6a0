//! Error types for the payment pipeline.
//!
//! Pipeline-level failures abort a whole batch and surface as [`PipelineError`].
//! Everything else is scoped to a single message and travels inside that
//! message's result envelope.

use crate::review::ReviewRole;
use thiserror::Error;

/// Result type alias for pipeline-level operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that abort the pipeline or the CLI.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Failed to open, read or write a file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing or writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Malformed configuration file
    #[error("Configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A batch cannot be scored or validated without banks
    #[error("Bank directory is empty")]
    EmptyBankDirectory,

    /// Configuration values out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Persistence collaborator rejected a write
    #[error("Record sink error: {0}")]
    Sink(String),

    /// Missing input file argument
    #[error("Missing input file argument. Usage: swift-pipeline <banks.csv> <messages.csv> [config.json]")]
    MissingArgument,
}

/// Failure of a single item inside a batch.
///
/// Captured per item; never aborts the batch or other workers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    /// The stage function returned an error
    #[error("stage failed: {0}")]
    Failed(String),

    /// The stage function panicked
    #[error("stage panicked: {0}")]
    Panicked(String),

    /// The batch deadline passed before the item completed
    #[error("batch timed out after {after_ms} ms")]
    TimedOut { after_ms: u64 },

    /// Every worker exited before the item was processed
    #[error("no worker available to process item")]
    WorkerLost,
}

/// Unrecoverable format violation after the correction budget is spent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("message {message_id} rejected after {iterations} iteration(s): {}", errors.join("; "))]
pub struct ValidationError {
    pub message_id: String,
    pub iterations: u32,
    pub errors: Vec<String>,
}

/// Fraud scoring problems. Never fatal: the affected sub-score degrades to neutral.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FraudScoringError {
    #[error("population of {actual} amounts is below the minimum of {required}")]
    InsufficientPopulation { required: usize, actual: usize },
}

/// Failures talking to the reasoning collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReviewError {
    /// Collaborator did not answer within the step timeout
    #[error("{role} timed out after {timeout_ms} ms")]
    Timeout { role: ReviewRole, timeout_ms: u64 },

    /// Failure worth retrying (network hiccup, rate limit)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Failure that retrying will not fix
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The collaborator call could not be dispatched
    #[error("failed to dispatch review call: {0}")]
    Dispatch(String),
}

impl ReviewError {
    /// Returns `true` if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReviewError::Timeout { .. } | ReviewError::Transient(_) | ReviewError::Dispatch(_)
        )
    }
}

/// Transaction splitting failures. Fatal for the affected transaction only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    /// Rule set is unusable (no remainder rule, bad percentage, ...)
    #[error("invalid split rules: {0}")]
    InvalidRules(String),

    /// Sum of splits differs from the total
    #[error("split invariant violated for {message_id}: total {total}, splits sum to {sum}")]
    InvariantViolated {
        message_id: String,
        total: String,
        sum: String,
    },

    /// A split worker exited without reporting its amount
    #[error("split worker lost result for rule {0}")]
    WorkerLost(usize),
}
