use crate::domain::types::{CorrelationId, EventKind, InvocationStatus};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidStateReason {
    NotTracked,
    AlreadyTerminal(InvocationStatus),
}

impl fmt::Display for InvalidStateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidStateReason::NotTracked => f.write_str("no tracked invocation"),
            InvalidStateReason::AlreadyTerminal(status) => {
                write!(f, "invocation already terminal ({status:?})")
            }
        }
    }
}

/// Failure classes of `RetryController::retry`.
///
/// `InvalidState` and `AlreadyInFlight` are caller errors and leave the ledger
/// untouched. `Submission` and `ReceiptFailure` are environment errors; they are
/// notified and recorded on the entry's retry sub-state.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("cannot retry 0x{}: {reason}", hex::encode(.correlation_id.as_slice()))]
    InvalidState {
        correlation_id: CorrelationId,
        reason: InvalidStateReason,
    },
    #[error("retry already in flight for 0x{}", hex::encode(.correlation_id.as_slice()))]
    AlreadyInFlight { correlation_id: CorrelationId },
    #[error("confirmation submission rejected: {0}")]
    Submission(String),
    #[error("confirmation receipt reported failure: {0}")]
    ReceiptFailure(String),
}

impl RetryError {
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidState { .. } | Self::AlreadyInFlight { .. })
    }
}

/// Reasons a raw event log is rejected at the ingress boundary.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("log is not a {expected:?} event (name={name:?} topic0={topic0:?})")]
    UnexpectedEvent {
        expected: EventKind,
        name: Option<String>,
        topic0: Option<String>,
    },
    #[error("log is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("log field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("wallet is not connected")]
    NotConnected,
    #[error("wrong network: expected chain {expected}, wallet is on {actual:?}")]
    WrongChain { expected: u64, actual: Option<u64> },
    #[error("agent call manager address is not configured")]
    ManagerNotConfigured,
    #[error("invalid agent id: {0}")]
    InvalidAgentId(String),
    #[error("invalid payment amount: {0}")]
    InvalidAmount(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn caller_errors_are_distinguished_from_environment_errors() {
        let id = B256::repeat_byte(0xab);
        assert!(RetryError::AlreadyInFlight { correlation_id: id }.is_caller_error());
        assert!(RetryError::InvalidState {
            correlation_id: id,
            reason: InvalidStateReason::NotTracked,
        }
        .is_caller_error());
        assert!(!RetryError::Submission("user rejected".to_string()).is_caller_error());
        assert!(!RetryError::ReceiptFailure("reverted".to_string()).is_caller_error());
    }

    #[test]
    fn retry_error_messages_render_full_correlation_id() {
        let id = B256::repeat_byte(0x01);
        let message = RetryError::InvalidState {
            correlation_id: id,
            reason: InvalidStateReason::AlreadyTerminal(InvocationStatus::Failed),
        }
        .to_string();
        assert!(message.starts_with(&format!("cannot retry 0x{}", "01".repeat(32))));
        assert!(message.ends_with("invocation already terminal (Failed)"));
    }
}
