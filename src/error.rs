//! Error taxonomy for the oracle.
//!
//! Fetch-layer errors stay contained inside the source loop and become
//! "no observation"; consensus errors surface as task failures; claim
//! evaluation problems become claim statuses rather than errors.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::TaskStatus;

#[derive(Debug, Error)]
pub enum OracleError {
    /// Malformed envelope, out-of-range coordinates or threshold, invalid
    /// policy. Returned to the caller, never retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Provider returned non-2xx or an undecodable body. The source
    /// contributes nothing to the task.
    #[error("upstream error from {provider}: {message}")]
    Upstream { provider: String, message: String },

    /// Rate-limiter token wait aborted by the task deadline.
    #[error("rate limit wait cancelled for {provider}")]
    RateLimitCancelled { provider: String },

    #[error("task {0} already exists")]
    DuplicateTaskId(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("task {task_id} is in state {state:?}, expected {expected}")]
    InvalidState {
        task_id: String,
        state: TaskStatus,
        expected: &'static str,
    },

    #[error("operator {operator} not assigned to task {task_id}")]
    UnassignedOperator { operator: String, task_id: String },

    #[error("duplicate response from operator {operator} for task {task_id}")]
    DuplicateResponse { operator: String, task_id: String },

    #[error("insufficient operators: {got} < {need}")]
    InsufficientOperators { got: usize, need: usize },

    #[error("insufficient responses: {got} < {need}")]
    InsufficientResponses { got: usize, need: usize },

    #[error("insufficient quorum after outlier filtering: {got} < {need}")]
    InsufficientQuorum { got: usize, need: usize },

    /// The executor collected zero observations; the aggregator treats this
    /// as a non-response from that operator.
    #[error("no observations collected for task {0}")]
    NoObservations(String),

    #[error("claim date {claim_date} outside policy period {start}..{end}")]
    OutOfPolicyPeriod {
        claim_date: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Terminal failure recorded on the task state, surfaced to waiters.
    #[error("task {task_id} failed: {reason}")]
    TaskFailed { task_id: String, reason: String },

    #[error("timed out waiting for task {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl OracleError {
    /// Stable label used for metrics and response shaping.
    pub fn kind(&self) -> &'static str {
        match self {
            OracleError::BadRequest(_) => "bad_request",
            OracleError::Upstream { .. } => "upstream_error",
            OracleError::RateLimitCancelled { .. } => "rate_limit_cancelled",
            OracleError::DuplicateTaskId(_) => "duplicate_task_id",
            OracleError::TaskNotFound(_) => "task_not_found",
            OracleError::InvalidState { .. } => "invalid_state",
            OracleError::UnassignedOperator { .. } => "unassigned_operator",
            OracleError::DuplicateResponse { .. } => "duplicate_response",
            OracleError::InsufficientOperators { .. } => "insufficient_operators",
            OracleError::InsufficientResponses { .. } => "insufficient_responses",
            OracleError::InsufficientQuorum { .. } => "insufficient_quorum",
            OracleError::NoObservations(_) => "no_observations",
            OracleError::OutOfPolicyPeriod { .. } => "out_of_policy_period",
            OracleError::TaskFailed { .. } => "task_failed",
            OracleError::Timeout(_) => "timeout",
            OracleError::Config(_) => "config",
        }
    }

    /// Errors the caller can fix; mapped to HTTP 400 by the transport.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            OracleError::BadRequest(_) | OracleError::DuplicateTaskId(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OracleError>;
