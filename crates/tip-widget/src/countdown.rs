//! Expiry countdown for one invoice.
//!
//! Emits the initial value immediately, then one decrement per second down to
//! 1; the tick boundary after that delivers the expired signal instead of a
//! zero tick. Cancellation wins any race with a pending tick: delivery and
//! `cancel` contend on the same lock.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::debug;

/// Live flag shared between a subscription's delivery path and its handle.
///
/// Callbacks run while the flag's lock is held, so once `close` returns no
/// further callback is running or can start. Used by both the countdown and
/// the settlement channel.
#[derive(Clone)]
pub(crate) struct DeliveryGate(Arc<Mutex<bool>>);

impl DeliveryGate {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(true)))
    }

    /// Invoke `callback` if the gate is still open. Leaves the gate open.
    pub(crate) fn deliver(&self, callback: impl FnOnce()) -> bool {
        let guard = lock(&self.0);
        if !*guard {
            return false;
        }
        callback();
        true
    }

    /// Invoke `callback` if the gate is still open, closing it first so the
    /// delivery is the gate's last.
    pub(crate) fn close_and_deliver(&self, callback: impl FnOnce()) -> bool {
        let mut guard = lock(&self.0);
        if !*guard {
            return false;
        }
        *guard = false;
        callback();
        true
    }

    /// Close the gate. Returns whether it was still open.
    pub(crate) fn close(&self) -> bool {
        let mut guard = lock(&self.0);
        std::mem::replace(&mut *guard, false)
    }
}

fn lock(mutex: &Mutex<bool>) -> MutexGuard<'_, bool> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Cancellation handle for a running countdown.
pub struct CountdownHandle {
    gate: DeliveryGate,
    task: JoinHandle<()>,
}

impl CountdownHandle {
    /// Stop the countdown. Idempotent; a no-op once the expired signal has
    /// been delivered. After this returns, no further callback fires.
    pub fn cancel(&self) {
        if self.gate.close() {
            debug!("countdown cancelled");
        }
        self.task.abort();
    }
}

/// Start a countdown of `duration_seconds`.
///
/// `on_tick` receives `duration_seconds` immediately, then each decremented
/// value down to 1. `on_expired` fires exactly once in place of a zero tick;
/// a zero duration expires immediately without any tick.
pub fn start(
    duration_seconds: u64,
    on_tick: impl Fn(u64) + Send + Sync + 'static,
    on_expired: impl Fn() + Send + Sync + 'static,
) -> CountdownHandle {
    let gate = DeliveryGate::new();
    let task = tokio::spawn(run(duration_seconds, gate.clone(), on_tick, on_expired));
    CountdownHandle { gate, task }
}

async fn run(
    duration_seconds: u64,
    gate: DeliveryGate,
    on_tick: impl Fn(u64),
    on_expired: impl Fn(),
) {
    if duration_seconds == 0 {
        gate.close_and_deliver(on_expired);
        return;
    }

    let mut remaining = duration_seconds;
    if !gate.deliver(|| on_tick(remaining)) {
        return;
    }

    let second = Duration::from_secs(1);
    let mut interval = interval_at(Instant::now() + second, second);
    loop {
        interval.tick().await;
        if remaining > 1 {
            remaining -= 1;
            if !gate.deliver(|| on_tick(remaining)) {
                return;
            }
        } else {
            gate.close_and_deliver(on_expired);
            return;
        }
    }
}
