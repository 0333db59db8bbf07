//! Widget event surface shared by the controller and its consumers.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backend::Invoice;
use crate::encoder::InvoiceCode;
use crate::error::{Result, TipError};

/// Callback type for delivering widget events to the rendering collaborator.
pub type EventCallback = Arc<dyn Fn(WidgetEvent) -> Result<()> + Send + Sync>;

/// Everything the widget reports outward during one invoice lifecycle.
///
/// `InvoiceReady` always precedes the first `CountdownTick`, and exactly one
/// of `Settled`, `Expired` or `Failed` ends the sequence.
#[derive(Debug)]
pub enum WidgetEvent {
    /// The backend issued an invoice. `code` carries the scannable code, or
    /// the encoding failure when no capacity class fits the payload; the
    /// invoice text stays valid and copyable either way.
    InvoiceReady {
        invoice: Invoice,
        code: Result<InvoiceCode>,
    },
    /// Whole seconds left until the invoice expires.
    CountdownTick { remaining_seconds: u64 },
    /// The invoice expired before a settlement was seen.
    Expired,
    /// The invoice was paid.
    Settled { picture_url: Option<String> },
    /// The lifecycle failed and the controller returned to idle.
    Failed { error: TipError },
}

/// Create an event callback that forwards every event into an unbounded
/// channel, for consumers that prefer a stream over a closure.
pub fn event_channel() -> (EventCallback, mpsc::UnboundedReceiver<WidgetEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: EventCallback = Arc::new(move |event| {
        tx.send(event)
            .map_err(|_| TipError::Internal("event channel closed".to_string()))
    });
    (callback, rx)
}
