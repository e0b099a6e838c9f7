//! Caller-facing handles: subscriptions, publish handles, cancel tokens.

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::communication::logbook::LogEntry;
use crate::error::{HermesError, HermesResult};

/// How often a blocked subscription re-checks its cancel token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// The bus's live subscriber channels, keyed by subscription id.
pub(crate) type SubscriberMap = Arc<Mutex<HashMap<u64, Sender<LogEntry>>>>;

/// Cooperative cancellation flag shared between a caller and a worker.
///
/// Cancellation is observed at suspension points (between publish passes,
/// between subscription reads); work already inside a write-lock transform
/// always completes so the log is never left half-written.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    canceled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

/// Handle to an in-flight publish.
///
/// The background worker keeps running if the handle is dropped; `wait`
/// joins it and surfaces its result.
pub struct PublishHandle {
    handle: JoinHandle<HermesResult<()>>,
    cancel: CancelToken,
}

impl PublishHandle {
    pub(crate) fn new(handle: JoinHandle<HermesResult<()>>, cancel: CancelToken) -> Self {
        Self { handle, cancel }
    }

    /// Block until the queue has drained (or the publish was canceled, which
    /// surfaces [`HermesError::Canceled`]).
    pub fn wait(self) -> HermesResult<()> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(HermesError::Worker("publish worker panicked".into())),
        }
    }

    /// Whether the worker has finished (successfully or not).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Request cancellation; the worker stops before its next pass.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The handle's cancel token, for wiring into caller-side scopes.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

/// A live subscription: an infinite blocking iterator over message payloads
/// in delivery order.
///
/// The iterator ends when the bus is disposed (the channel disconnects) or
/// when the subscription's cancel token fires; it is not restartable.
/// Dropping the subscription unregisters it from the bus.
pub struct Subscription {
    id: u64,
    rx: Receiver<LogEntry>,
    cancel: CancelToken,
    subscribers: SubscriberMap,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        rx: Receiver<LogEntry>,
        cancel: CancelToken,
        subscribers: SubscriberMap,
    ) -> Self {
        Self {
            id,
            rx,
            cancel,
            subscribers,
        }
    }

    /// Request cancellation; the iterator returns `None` at its next check.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The subscription's cancel token.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Receive the next payload, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout, cancellation, or disposal.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.cancel.is_canceled() {
                return None;
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let step = remaining.min(CANCEL_POLL_INTERVAL);
            match self.rx.recv_timeout(step) {
                Ok(entry) => return Some(entry.message),
                Err(RecvTimeoutError::Disconnected) => return None,
                Err(RecvTimeoutError::Timeout) => {
                    if remaining.is_zero() {
                        return None;
                    }
                }
            }
        }
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(entry) = self.rx.try_recv() {
            out.push(entry.message);
        }
        out
    }
}

impl Iterator for Subscription {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.cancel.is_canceled() {
                return None;
            }
            match self.rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(entry) => return Some(entry.message),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers.lock().remove(&self.id);
    }
}
