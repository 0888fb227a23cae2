//! Error type shared by every swap component.

use std::time::Duration;

use thiserror::Error;

/// Coarse grouping of failures, used by callers to decide whether to fix
/// their input, wait for the backend, or change economic parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or malformed caller arguments. Never retried.
    Input,
    /// Chain daemon unreachable or paused. Heals once the breaker window lapses.
    Unavailable,
    /// Bad daemon credentials. Retrying with the same configuration won't help.
    Authentication,
    /// Fee or amount makes the swap uneconomic.
    Economic,
    /// Daemon answered, but the answer is unusable or shows a broken backend.
    Backend,
    /// Lightning or cache collaborator failure.
    Collaborator,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("no inputs to spend")]
    NoInputs,

    #[error("fee {fee} exceeds spendable value {value}")]
    FeeExceedsValue { fee: u64, value: u64 },

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("missing rpc port for network {0}")]
    MissingPort(String),

    #[error("chain daemon rejected rpc credentials")]
    AuthenticationFailure,

    #[error("chain daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("chain daemon request timed out after {0:?}")]
    Timeout(Duration),

    #[error("chain rpc paused for another {0:?} after a daemon failure")]
    CircuitOpen(Duration),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("unexpected daemon response: {0}")]
    UnexpectedResponse(String),

    #[error("chain tip is stale: last block is {0:?} old")]
    StaleBackend(Duration),

    #[error("chain daemon returned no chain tip")]
    NoChainTip,

    #[error("lightning: {0}")]
    Lightning(String),

    #[error("payment preimage does not match payment hash")]
    PreimageMismatch,
}

impl Error {
    pub fn invalid_input(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidInput { .. }
            | Error::NoInputs
            | Error::InvalidPrivateKey(_)
            | Error::InvalidAddress { .. }
            | Error::UnknownNetwork(_)
            | Error::MissingPort(_) => ErrorCategory::Input,
            Error::DaemonUnavailable(_) | Error::Timeout(_) | Error::CircuitOpen(_) => {
                ErrorCategory::Unavailable
            }
            Error::AuthenticationFailure => ErrorCategory::Authentication,
            Error::FeeExceedsValue { .. } => ErrorCategory::Economic,
            Error::Rpc { .. }
            | Error::UnexpectedResponse(_)
            | Error::StaleBackend(_)
            | Error::NoChainTip => ErrorCategory::Backend,
            Error::Lightning(_) | Error::PreimageMismatch => ErrorCategory::Collaborator,
        }
    }

    /// Whether re-issuing the same call later can succeed without caller changes.
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Unavailable
    }
}

pub type Result<T> = std::result::Result<T, Error>;
