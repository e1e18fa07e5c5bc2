//! Reconciliation error taxonomy.
//!
//! Every provider operation reports its outcome through [`Result`]:
//! `Ok(..)` means the resource reached its target state, [`ProviderError::Retryable`]
//! means "not done yet, call again no sooner than `after`", and
//! [`ProviderError::Fatal`] means the caller must stop and surface the failure.

use std::time::Duration;

use thiserror::Error;

/// Errors returned across the provider boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Unrecoverable failure. Retrying will not help.
    #[error("fatal: {message}")]
    Fatal { message: String },

    /// The resource is still converging. `after` is the estimated time until
    /// another call is likely to make progress.
    #[error("retryable after {after:?}: {message}")]
    Retryable { after: Duration, message: String },
}

impl ProviderError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn retryable(after: Duration, message: impl Into<String>) -> Self {
        Self::Retryable {
            after,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    /// Estimated delay before the next attempt, if the error is retryable.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Retryable { after, .. } => Some(*after),
            Self::Fatal { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Fatal { message } | Self::Retryable { message, .. } => message,
        }
    }
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors converting between the canonical model and its wire or JSON forms.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// Required input was absent.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No asset variant was set, or the variant is not known to this side.
    #[error("unsupported asset type")]
    UnsupportedAssetType,

    /// Asset variant access on the wrong arm.
    #[error("asset is not a {expected}")]
    WrongAssetType { expected: &'static str },

    #[error("invalid timestamp: {seconds}s {nanos}ns")]
    InvalidTimestamp { seconds: i64, nanos: i32 },

    #[error("invalid max price: {0}")]
    InvalidMaxPrice(String),
}

impl From<ConversionError> for ProviderError {
    fn from(err: ConversionError) -> Self {
        ProviderError::fatal(err.to_string())
    }
}
