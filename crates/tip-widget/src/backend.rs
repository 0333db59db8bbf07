//! Backend collaborator trait and the domain types it trades in.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// A time-bounded payment request issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    /// BOLT11 payment request, shown and encoded for scanning.
    pub payload: String,
    /// Opaque settlement-correlation key (the hex payment hash). Stable for
    /// the life of this invoice and never shared between invoices.
    pub identifier: String,
    /// Seconds from issuance until the invoice expires.
    pub expiry_seconds: u64,
    /// Optional picture shown on settlement.
    pub picture_url: Option<String>,
}

/// Result of one settlement poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementStatus {
    pub settled: bool,
    pub picture_url: Option<String>,
}

/// Push stream of identifiers the backend reports as settled. Broadcast:
/// events for other invoices are expected and must be ignored by consumers.
pub type SettlementStream = BoxStream<'static, Result<String>>;

/// The invoice backend.
///
/// Object safe so the controller and channel stay agnostic of the transport;
/// [`crate::http::HttpTipBackend`] is the production implementation and tests
/// substitute mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TipBackend: Send + Sync {
    /// Request a new invoice over `amount` (smallest currency unit).
    async fn create_invoice(&self, amount: u64, message: &str) -> Result<Invoice>;

    /// Check whether the invoice behind `identifier` has been settled.
    async fn check_settled(&self, identifier: &str) -> Result<SettlementStatus>;

    /// Open the persistent settlement push stream. An error here is the
    /// channel's trigger to degrade to polling.
    async fn settlement_stream(&self) -> Result<SettlementStream>;
}
