//! Settlement notification channel for one invoice.
//!
//! Tries the backend's push stream first; if establishment fails (or an
//! established stream dies), degrades to fixed-interval polling. Whichever
//! mechanism sees the settlement first delivers `on_settled` exactly once.
//! Both mechanisms hide behind the same cancellable handle, so the
//! controller's race logic never cares which one won.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

use crate::backend::{SettlementStream, TipBackend};
use crate::countdown::DeliveryGate;

/// Channel state. Subscribing is the `Establishing` entry; `Fired` and
/// `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Establishing,
    Active,
    Degraded,
    Fired,
    Cancelled,
}

/// Settlement channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Poll cadence on the degraded path.
    pub poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Cancellation handle for a settlement subscription.
pub struct SettlementHandle {
    gate: DeliveryGate,
    state: Arc<Mutex<ChannelState>>,
    task: JoinHandle<()>,
}

impl SettlementHandle {
    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        *lock(&self.state)
    }

    /// Stop the subscription. Idempotent in every state; after this returns
    /// `on_settled` can no longer fire, even for a poll response already in
    /// flight.
    pub fn cancel(&self) {
        if self.gate.close() {
            let mut state = lock(&self.state);
            if *state != ChannelState::Fired {
                *state = ChannelState::Cancelled;
            }
            debug!("settlement channel cancelled");
        }
        self.task.abort();
    }
}

/// Subscribe to settlement of the invoice behind `identifier`.
///
/// `on_settled` receives the picture URL from the poll response when the
/// degraded path won; the push event carries none.
pub fn subscribe(
    backend: Arc<dyn TipBackend>,
    identifier: String,
    config: ChannelConfig,
    on_settled: impl Fn(Option<String>) + Send + Sync + 'static,
) -> SettlementHandle {
    let gate = DeliveryGate::new();
    let state = Arc::new(Mutex::new(ChannelState::Establishing));
    let task = tokio::spawn(run(
        backend,
        identifier,
        config,
        gate.clone(),
        Arc::clone(&state),
        on_settled,
    ));
    SettlementHandle { gate, state, task }
}

async fn run(
    backend: Arc<dyn TipBackend>,
    identifier: String,
    config: ChannelConfig,
    gate: DeliveryGate,
    state: Arc<Mutex<ChannelState>>,
    on_settled: impl Fn(Option<String>),
) {
    match backend.settlement_stream().await {
        Ok(stream) => {
            advance(&state, ChannelState::Active);
            debug!(%identifier, "settlement push stream established");
            if watch_stream(stream, &identifier).await {
                fire(&gate, &state, &on_settled, None);
                return;
            }
            warn!(%identifier, "settlement push stream ended, falling back to polling");
        }
        Err(error) => {
            warn!(%identifier, %error, "settlement push unavailable, falling back to polling");
        }
    }

    advance(&state, ChannelState::Degraded);

    let mut interval = interval_at(Instant::now() + config.poll_interval, config.poll_interval);
    // The poll below is awaited inline, so a slow response makes elapsed
    // ticks skip rather than queue: each cycle is single-flight.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        match backend.check_settled(&identifier).await {
            Ok(status) if status.settled => {
                fire(&gate, &state, &on_settled, status.picture_url);
                return;
            }
            Ok(_) => debug!(%identifier, "invoice not settled yet"),
            Err(error) => warn!(%identifier, %error, "settlement poll failed, retrying"),
        }
    }
}

/// Consume push events until one matches `identifier`. Returns false when
/// the stream ends or errors, which sends the channel to the degraded path.
async fn watch_stream(mut stream: SettlementStream, identifier: &str) -> bool {
    while let Some(event) = stream.next().await {
        match event {
            Ok(settled) if settled == identifier => return true,
            Ok(other) => debug!(event = %other, "ignoring settlement event for another invoice"),
            Err(error) => {
                warn!(%error, "settlement push stream failed");
                return false;
            }
        }
    }
    false
}

fn fire(
    gate: &DeliveryGate,
    state: &Mutex<ChannelState>,
    on_settled: &impl Fn(Option<String>),
    picture_url: Option<String>,
) {
    if gate.close_and_deliver(|| on_settled(picture_url)) {
        *lock(state) = ChannelState::Fired;
    }
}

/// Move to `next` unless a terminal state was reached meanwhile.
fn advance(state: &Mutex<ChannelState>, next: ChannelState) {
    let mut guard = lock(state);
    if !matches!(*guard, ChannelState::Fired | ChannelState::Cancelled) {
        *guard = next;
    }
}

fn lock(mutex: &Mutex<ChannelState>) -> MutexGuard<'_, ChannelState> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
