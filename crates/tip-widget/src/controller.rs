//! Invoice lifecycle orchestration.
//!
//! One lifecycle at a time: `Idle → Requesting → AwaitingSettlement →
//! {Settled | Expired | Failed} → Idle`. While awaiting settlement the
//! countdown and the settlement channel race; the first to fire cancels the
//! other before the outward event is emitted, so exactly one terminal event
//! reaches the consumer per lifecycle.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::backend::{Invoice, TipBackend};
use crate::channel::{self, ChannelConfig, SettlementHandle};
use crate::countdown::{self, CountdownHandle};
use crate::encoder;
use crate::error::{Result, TipError};
use crate::events::{EventCallback, WidgetEvent};

/// Lifecycle state. The `Idle` check on entry is the single-flight guard;
/// the terminal states are passed through and the controller rests in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Requesting,
    AwaitingSettlement,
    Settled,
    Expired,
    Failed,
}

/// The tip widget core.
pub struct TipWidget {
    backend: Arc<dyn TipBackend>,
    channel_config: ChannelConfig,
    events: EventCallback,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    state: LifecycleState,
    invoice: Option<Invoice>,
    countdown: Option<CountdownHandle>,
    channel: Option<SettlementHandle>,
}

/// Winner of the settlement-versus-expiry race.
enum Outcome {
    Settled(Option<String>),
    Expired,
}

impl TipWidget {
    /// Widget with the default 2-second degraded poll interval.
    pub fn new(backend: Arc<dyn TipBackend>, events: EventCallback) -> Self {
        Self::with_config(backend, ChannelConfig::default(), events)
    }

    pub fn with_config(
        backend: Arc<dyn TipBackend>,
        channel_config: ChannelConfig,
        events: EventCallback,
    ) -> Self {
        Self {
            backend,
            channel_config,
            events,
            inner: Arc::new(Mutex::new(Inner {
                state: LifecycleState::Idle,
                invoice: None,
                countdown: None,
                channel: None,
            })),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        lock(&self.inner).state
    }

    /// Request an invoice over `amount` (raw caller text, validated here).
    ///
    /// Results arrive through the event callback. A call while a lifecycle
    /// is already running is caller misuse: it is logged and dropped without
    /// any event.
    pub async fn request_invoice(&self, amount: &str, message: &str) {
        {
            let mut inner = lock(&self.inner);
            if inner.state != LifecycleState::Idle {
                warn!(state = ?inner.state, "invoice request still pending, ignoring new request");
                return;
            }
            inner.state = LifecycleState::Requesting;
        }

        let amount = match validate_amount(amount) {
            Ok(amount) => amount,
            Err(error) => {
                self.fail(error);
                return;
            }
        };

        debug!(amount, "requesting invoice");
        match self.backend.create_invoice(amount, message).await {
            Ok(invoice) => self.begin_lifecycle(invoice),
            Err(error) => self.fail(error),
        }
    }

    /// Enter `AwaitingSettlement`: report the invoice, then start the
    /// countdown and the settlement channel concurrently.
    fn begin_lifecycle(&self, invoice: Invoice) {
        info!(
            identifier = %invoice.identifier,
            expiry = invoice.expiry_seconds,
            "invoice issued"
        );

        let code = encoder::encode(&invoice.payload);
        if let Err(error) = &code {
            // The invoice stays copyable as text; only the scannable
            // rendering is lost.
            warn!(%error, "invoice payload has no scannable rendering");
        }
        emit(
            &self.events,
            WidgetEvent::InvoiceReady {
                invoice: invoice.clone(),
                code,
            },
        );

        let tick_events = self.events.clone();
        let expiry_inner = Arc::clone(&self.inner);
        let expiry_events = self.events.clone();
        let settle_inner = Arc::clone(&self.inner);
        let settle_events = self.events.clone();

        // The handles are stored under the same lock that flips the state,
        // so an immediate expiry (zero-duration invoice) cannot observe a
        // half-started lifecycle.
        let mut inner = lock(&self.inner);
        inner.state = LifecycleState::AwaitingSettlement;
        inner.countdown = Some(countdown::start(
            invoice.expiry_seconds,
            move |remaining_seconds| {
                emit(&tick_events, WidgetEvent::CountdownTick { remaining_seconds });
            },
            move || finalize(&expiry_inner, &expiry_events, Outcome::Expired),
        ));
        inner.channel = Some(channel::subscribe(
            Arc::clone(&self.backend),
            invoice.identifier.clone(),
            self.channel_config.clone(),
            move |picture_url| {
                finalize(&settle_inner, &settle_events, Outcome::Settled(picture_url));
            },
        ));
        inner.invoice = Some(invoice);
    }

    /// Fail the lifecycle before it reached `AwaitingSettlement`.
    fn fail(&self, error: TipError) {
        warn!(%error, kind = error.kind(), "invoice request failed");
        lock(&self.inner).state = LifecycleState::Failed;
        emit(&self.events, WidgetEvent::Failed { error });
        lock(&self.inner).state = LifecycleState::Idle;
    }
}

/// Resolve the settlement-versus-expiry race.
///
/// The phase check under the state lock picks the single winner; the losing
/// mechanism is cancelled before the outward event goes out, so nothing can
/// fire after the lifecycle has been reported finished.
fn finalize(shared: &Arc<Mutex<Inner>>, events: &EventCallback, outcome: Outcome) {
    let (countdown, channel, invoice) = {
        let mut inner = lock(shared);
        if inner.state != LifecycleState::AwaitingSettlement {
            debug!(state = ?inner.state, "race already decided, dropping late signal");
            return;
        }
        inner.state = match outcome {
            Outcome::Settled(_) => LifecycleState::Settled,
            Outcome::Expired => LifecycleState::Expired,
        };
        (
            inner.countdown.take(),
            inner.channel.take(),
            inner.invoice.take(),
        )
    };

    // Only the loser gets cancelled here: the winner is mid-delivery through
    // its own gate on this very thread, and re-locking that gate would
    // deadlock. Its task is already returning.
    match outcome {
        Outcome::Settled(_) => {
            if let Some(handle) = countdown {
                handle.cancel();
            }
            drop(channel);
        }
        Outcome::Expired => {
            if let Some(handle) = channel {
                handle.cancel();
            }
            drop(countdown);
        }
    }

    let event = match outcome {
        Outcome::Settled(picture_url) => {
            info!("invoice settled");
            WidgetEvent::Settled {
                // Poll responses carry the freshest picture; fall back to
                // the one captured at creation for the push path.
                picture_url: picture_url.or_else(|| invoice.and_then(|invoice| invoice.picture_url)),
            }
        }
        Outcome::Expired => {
            info!("invoice expired before settlement");
            WidgetEvent::Expired
        }
    };
    emit(events, event);

    lock(shared).state = LifecycleState::Idle;
}

fn validate_amount(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TipError::InvalidAmount("No tip amount set".to_string()));
    }
    let amount: u64 = trimmed
        .parse()
        .map_err(|_| TipError::InvalidAmount("Tip amount must be a number".to_string()))?;
    if amount == 0 {
        return Err(TipError::InvalidAmount(
            "Tip amount must be greater than zero".to_string(),
        ));
    }
    Ok(amount)
}

/// Deliver one event; a broken consumer is logged, never allowed to corrupt
/// the lifecycle.
fn emit(events: &EventCallback, event: WidgetEvent) {
    if let Err(error) = events(event) {
        warn!(%error, "widget event callback failed");
    }
}

fn lock(mutex: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
