use crate::account::AccountError;
use crate::models::Status;
use thiserror::Error;
use uuid::Uuid;

/// Convenience alias for forward test operation results.
pub type ForwardtestResult<T> = Result<T, ForwardtestError>;

/// Every failure is scoped to one operation on one forward test.
#[derive(Debug, Error)]
pub enum ForwardtestError {
    #[error("empty accounts")]
    EmptyAccounts,
    #[error("invalid callbacks: {0}")]
    InvalidCallbacks(String),
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("forward test {id} cannot move from {from} to {to}")]
    InvalidStatusTransition { id: Uuid, from: Status, to: Status },
    #[error("forward test {0} not found")]
    NotFound(Uuid),
    #[error("forward test {id} has no account on exchange {exchange:?}")]
    UnknownExchange { id: Uuid, exchange: String },
    #[error("no price available for {pair} on {exchange}")]
    NoPriceAvailable { exchange: String, pair: String },
    /// Raised by the balance update itself, e.g. insufficient balance.
    #[error(transparent)]
    Order(#[from] AccountError),
    #[error("callback task {task_id} failed: {reason}")]
    DownstreamCallback { task_id: String, reason: String },
    #[error("callback task {0} is already running or completed")]
    DuplicateTask(String),
    #[error("forward test {id} was modified concurrently ({attempts} save attempts)")]
    Conflict { id: Uuid, attempts: u32 },
    #[error("unknown operation {0:?}")]
    UnknownOperation(String),
    #[error("invalid payload for {operation}: {reason}")]
    InvalidPayload { operation: String, reason: String },
    #[error("store error: {0:#}")]
    Store(anyhow::Error),
    #[error("adapter error: {0:#}")]
    Adapter(anyhow::Error),
}

/// Broad error families, used by the worker and the CLI to classify failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    NoPrice,
    Conflict,
    Downstream,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NoPrice => "no_price",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Downstream => "downstream",
            ErrorKind::Internal => "internal",
        }
    }
}

impl ForwardtestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForwardtestError::EmptyAccounts
            | ForwardtestError::InvalidCallbacks(_)
            | ForwardtestError::InvalidOrder(_)
            | ForwardtestError::InvalidStatusTransition { .. }
            | ForwardtestError::Order(_)
            | ForwardtestError::UnknownOperation(_)
            | ForwardtestError::InvalidPayload { .. } => ErrorKind::Validation,
            ForwardtestError::NotFound(_) | ForwardtestError::UnknownExchange { .. } => {
                ErrorKind::NotFound
            }
            ForwardtestError::NoPriceAvailable { .. } => ErrorKind::NoPrice,
            ForwardtestError::DuplicateTask(_) | ForwardtestError::Conflict { .. } => {
                ErrorKind::Conflict
            }
            ForwardtestError::DownstreamCallback { .. } => ErrorKind::Downstream,
            ForwardtestError::Store(_) | ForwardtestError::Adapter(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_error_families() {
        assert_eq!(ForwardtestError::EmptyAccounts.kind(), ErrorKind::Validation);
        assert_eq!(
            ForwardtestError::NotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ForwardtestError::UnknownExchange {
                id: Uuid::nil(),
                exchange: "kraken".to_string(),
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ForwardtestError::DuplicateTask("forwardtest-x-init".to_string()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ForwardtestError::Adapter(anyhow::anyhow!("connection refused")).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn store_errors_render_their_context_chain() {
        let err = ForwardtestError::Store(
            anyhow::anyhow!("connection reset").context("failed to read forward test"),
        );
        assert_eq!(
            err.to_string(),
            "store error: failed to read forward test: connection reset"
        );
    }
}
