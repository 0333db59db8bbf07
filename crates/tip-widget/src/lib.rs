#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

//! Invoice lifecycle and settlement-notification core for a Lightning tip
//! widget.
//!
//! [`TipWidget`] drives one invoice lifecycle at a time: it validates the
//! requested amount, asks the [`TipBackend`] for an invoice, encodes the
//! payload as a scannable code, and then races an expiry countdown against a
//! settlement notification. Settlement arrives over a push stream when the
//! backend supports one, degrading to fixed-interval polling when it does
//! not. Consumers observe everything through [`WidgetEvent`]s; presentation
//! stays entirely outside this crate.

pub mod backend;
pub mod channel;
pub mod controller;
pub mod countdown;
pub mod encoder;
pub mod error;
pub mod events;
pub mod http;

pub use backend::{Invoice, SettlementStatus, SettlementStream, TipBackend};
pub use channel::{ChannelConfig, ChannelState, SettlementHandle};
pub use controller::{LifecycleState, TipWidget};
pub use countdown::CountdownHandle;
pub use encoder::InvoiceCode;
pub use error::{Result, TipError};
pub use events::{EventCallback, WidgetEvent, event_channel};
pub use http::{HttpBackendConfig, HttpTipBackend};
