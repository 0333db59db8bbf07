//! Widget error types.

use thiserror::Error;

/// Widget error type.
///
/// `InvalidAmount`, `BackendRejected` and `BackendUnreachable` terminate a
/// lifecycle through the `Failed` event. `EncodingOverflow` is reported
/// inside `InvoiceReady` and leaves the lifecycle running. `ChannelDegraded`
/// is only ever logged.
#[derive(Debug, Error)]
pub enum TipError {
    #[error("{0}")]
    InvalidAmount(String),

    #[error("Failed to reach backend: {detail}")]
    BackendUnreachable { detail: String },

    #[error("{0}")]
    BackendRejected(String),

    #[error("no QR capacity class fits a {length} character payload")]
    EncodingOverflow { length: usize },

    #[error("settlement push stream unavailable: {0}")]
    ChannelDegraded(String),

    #[error("invalid backend configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TipError {
    /// Stable discriminant for callers that branch on the error category.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "invalid_amount",
            Self::BackendUnreachable { .. } => "backend_unreachable",
            Self::BackendRejected(_) => "backend_rejected",
            Self::EncodingOverflow { .. } => "encoding_overflow",
            Self::ChannelDegraded(_) => "channel_degraded",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Widget result type.
pub type Result<T> = std::result::Result<T, TipError>;
