//! The message bus coordinator
//!
//! [`MessageBus`] implements broadcast publish/subscribe on top of a
//! [`SharedRegion`]: publishers append entries to the shared log under the
//! write lock (trimming aged-out entries first), and every participant's
//! receive path fans new entries out to its local subscribers exactly once,
//! in id order.

use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::communication::logbook::{entry_overhead, LogBook, LogEntry, LOG_HEADER_SIZE};
use crate::communication::region::MappedRegion;
use crate::communication::subscription::{
    CancelToken, PublishHandle, SubscriberMap, Subscription,
};
use crate::communication::traits::SharedRegion;
use crate::config::BusConfig;
use crate::error::{HermesError, HermesResult};
use crate::utils::monotonic_ns;

/// How long a single publish pass may keep the cross-process write lock.
const WRITE_SLOT_BUDGET: Duration = Duration::from_millis(100);

/// Backoff between passes while the log is full of not-yet-expired entries,
/// giving other participants time to read and entries time to age out.
const FULL_LOG_BACKOFF: Duration = Duration::from_millis(50);

/// Subscription id of the receiver worker's internal channel.
const INTERNAL_SUBSCRIPTION_ID: u64 = 0;

/// Callback invoked by the receiver worker for every delivered entry.
pub type MessageHandler = Box<dyn Fn(&LogEntry) + Send + Sync>;

/// State shared between the bus handle, its workers, and the region
/// listener.
struct BusShared {
    /// The receive gate. Guards the cursor, so cursor updates are only ever
    /// made by the single in-flight receive pass.
    cursor: Mutex<i64>,
    subscribers: SubscriberMap,
    next_subscription_id: AtomicU64,
    handlers: Mutex<Vec<MessageHandler>>,
    published: AtomicU64,
    received: AtomicU64,
    disposed: AtomicBool,
    /// Canceled on disposal; stops outstanding publish workers between
    /// passes.
    shutdown: CancelToken,
}

/// One participant on a named bus.
///
/// Every `MessageBus` has a random 128-bit instance id; entries it publishes
/// carry that id and are filtered out of its own deliveries, so a
/// participant only observes the other participants' messages.
pub struct MessageBus {
    instance_id: Uuid,
    region: Arc<dyn SharedRegion>,
    owns_region: bool,
    min_message_age: Duration,
    wait_timeout: Duration,
    shared: Arc<BusShared>,
    listener_id: usize,
    receiver_worker: Mutex<Option<JoinHandle<()>>>,
}

impl MessageBus {
    /// Create a participant on the named bus described by `config`, creating
    /// or joining the underlying kernel objects. The bus owns the region and
    /// disposes it on teardown.
    pub fn new(config: &BusConfig) -> HermesResult<Self> {
        config.validate()?;
        let region = MappedRegion::open(
            &config.name,
            config.max_file_size,
            config.max_reader_count,
            config.wait_timeout(),
        )?;
        Self::with_region(
            Arc::new(region),
            true,
            config.min_message_age(),
            config.wait_timeout(),
        )
    }

    /// Create a participant over an externally supplied region.
    ///
    /// `owns_region` decides whether disposal of this bus also disposes the
    /// region.
    pub fn with_region(
        region: Arc<dyn SharedRegion>,
        owns_region: bool,
        min_message_age: Duration,
        wait_timeout: Duration,
    ) -> HermesResult<Self> {
        let instance_id = Uuid::new_v4();

        let shared = Arc::new(BusShared {
            cursor: Mutex::new(0),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscription_id: AtomicU64::new(INTERNAL_SUBSCRIPTION_ID + 1),
            handlers: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
            received: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            shutdown: CancelToken::new(),
        });

        // Start the cursor at the current head of the log so history that
        // predates this participant is never replayed.
        let book = LogBook::decode_or_empty(&region.read()?);
        *shared.cursor.lock() = book.last_id;

        // Internal subscription feeding the receiver worker.
        let (internal_tx, internal_rx) = channel::unbounded();
        shared
            .subscribers
            .lock()
            .insert(INTERNAL_SUBSCRIPTION_ID, internal_tx);

        let worker_shared = Arc::clone(&shared);
        let receiver_worker = std::thread::Builder::new()
            .name("hermes-bus-recv".into())
            .spawn(move || Self::receiver_worker(internal_rx, worker_shared))
            .map_err(|e| HermesError::Worker(format!("spawning receiver worker: {}", e)))?;

        // Every committed write (from any participant) triggers a receive
        // pass on this participant.
        let listener_region = Arc::clone(&region);
        let listener_shared = Arc::clone(&shared);
        let listener_id = region.add_update_listener(Box::new(move || {
            if let Err(e) = receive_pass(
                &listener_region,
                &listener_shared,
                instance_id,
                wait_timeout,
            ) {
                log::warn!("receive pass failed: {}", e);
            }
        }));

        Ok(Self {
            instance_id,
            region,
            owns_region,
            min_message_age,
            wait_timeout,
            shared,
            listener_id,
            receiver_worker: Mutex::new(Some(receiver_worker)),
        })
    }

    /// This participant's 128-bit identity.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Publish one message to every other participant on the bus.
    ///
    /// Returns immediately with a handle; the append runs on a background
    /// worker. The message must be non-empty and must be able to fit the
    /// log capacity on its own.
    pub fn publish(&self, message: Vec<u8>) -> HermesResult<PublishHandle> {
        self.ensure_live()?;
        if message.is_empty() {
            return Err(HermesError::EmptyMessage);
        }
        self.spawn_publisher(VecDeque::from([message]))
    }

    /// Publish an ordered batch. Empty messages in the batch are skipped.
    ///
    /// The batch appears contiguously in the log relative to each single
    /// pass; across passes other publishers may interleave, but this batch's
    /// internal order is preserved.
    pub fn publish_batch(&self, messages: Vec<Vec<u8>>) -> HermesResult<PublishHandle> {
        self.ensure_live()?;
        self.spawn_publisher(messages.into())
    }

    fn spawn_publisher(&self, queue: VecDeque<Vec<u8>>) -> HermesResult<PublishHandle> {
        let max = self.region.max_payload_size();
        for message in queue.iter().filter(|m| !m.is_empty()) {
            // A message that cannot fit even an otherwise-empty log would
            // make the worker spin forever; reject it up front.
            let cost = LOG_HEADER_SIZE + entry_overhead() + message.len();
            if cost > max {
                return Err(HermesError::PayloadTooLarge { size: cost, max });
            }
        }

        let cancel = CancelToken::new();
        let worker = PublishWorker {
            region: Arc::clone(&self.region),
            shared: Arc::clone(&self.shared),
            instance_id: self.instance_id,
            min_message_age: self.min_message_age,
            cancel: cancel.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("hermes-bus-pub".into())
            .spawn(move || worker.run(queue))
            .map_err(|e| HermesError::Worker(format!("spawning publish worker: {}", e)))?;
        Ok(PublishHandle::new(handle, cancel))
    }

    /// Register a subscriber. See [`Subscription`] for the consumption API.
    pub fn subscribe(&self) -> HermesResult<Subscription> {
        self.subscribe_with_cancel(CancelToken::new())
    }

    /// Register a subscriber bound to an externally controlled cancel token.
    pub fn subscribe_with_cancel(&self, cancel: CancelToken) -> HermesResult<Subscription> {
        self.ensure_live()?;
        let id = self.shared.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::unbounded();
        self.shared.subscribers.lock().insert(id, tx);
        Ok(Subscription::new(
            id,
            rx,
            cancel,
            Arc::clone(&self.shared.subscribers),
        ))
    }

    /// Register a synchronous handler invoked by the receiver worker for
    /// every delivered entry. Panics inside the handler are caught and
    /// logged, never propagated into the bus.
    pub fn on_message_received(&self, handler: impl Fn(&LogEntry) + Send + Sync + 'static) {
        self.shared.handlers.lock().push(Box::new(handler));
    }

    /// Run one receive pass on the caller's thread. Used by tests to drain
    /// deterministically; normal operation is driven by region updates.
    pub fn read(&self) -> HermesResult<u64> {
        self.ensure_live()?;
        receive_pass(
            &self.region,
            &self.shared,
            self.instance_id,
            self.wait_timeout,
        )
    }

    /// Messages successfully appended by this participant.
    pub fn messages_published(&self) -> u64 {
        self.shared.published.load(Ordering::Acquire)
    }

    /// Messages delivered to this participant (counted once per entry, not
    /// per subscriber).
    pub fn messages_received(&self) -> u64 {
        self.shared.received.load(Ordering::Acquire)
    }

    /// Reset both counters to zero.
    pub fn reset_metrics(&self) -> HermesResult<()> {
        self.ensure_live()?;
        self.shared.published.store(0, Ordering::Release);
        self.shared.received.store(0, Ordering::Release);
        Ok(())
    }

    /// Whether the bus has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Tear the participant down.
    ///
    /// Stops receive triggers and outstanding publishes, completes every
    /// subscription (their iterators end), joins the receiver worker, and -
    /// when the region is owned - disposes it under the receive gate.
    /// Idempotent; later public calls fail [`HermesError::Disposed`].
    pub fn dispose(&self) -> HermesResult<()> {
        self.region.remove_update_listener(self.listener_id);
        self.shared.shutdown.cancel();
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Completing the channels ends every Subscription iterator and
        // disconnects the receiver worker's internal channel.
        self.shared.subscribers.lock().clear();
        if let Some(worker) = self.receiver_worker.lock().take() {
            let _ = worker.join();
        }

        if self.owns_region {
            // Hold the receive gate through region disposal so no receive
            // pass can be reading a region that is going away.
            let _gate = self
                .shared
                .cursor
                .try_lock_for(self.wait_timeout)
                .ok_or_else(|| HermesError::timeout("receive gate during disposal"))?;
            self.region.dispose()?;
        }
        Ok(())
    }

    fn ensure_live(&self) -> HermesResult<()> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(HermesError::Disposed);
        }
        Ok(())
    }

    /// Receiver worker: drains the internal subscription and invokes the
    /// registered handlers, isolating the bus from handler panics.
    fn receiver_worker(rx: Receiver<LogEntry>, shared: Arc<BusShared>) {
        while let Ok(entry) = rx.recv() {
            let handlers = shared.handlers.lock();
            for handler in handlers.iter() {
                if catch_unwind(AssertUnwindSafe(|| handler(&entry))).is_err() {
                    log::error!("message handler panicked for entry {}; continuing", entry.id);
                }
            }
        }
        log::debug!("receiver worker exiting");
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::warn!("bus disposal failed: {}", e);
        }
    }
}

/// One gate-serialized receive pass: read the log, deliver everything newer
/// than the cursor that was published by someone else, advance the cursor.
///
/// The gate makes delivery at-most-once: cursor updates are serialized, and
/// entries at or below the cursor observed at pass start are never
/// re-delivered. A pass triggered while another is in flight waits on the
/// gate and then simply observes the already-advanced cursor.
fn receive_pass(
    region: &Arc<dyn SharedRegion>,
    shared: &Arc<BusShared>,
    instance_id: Uuid,
    wait_timeout: Duration,
) -> HermesResult<u64> {
    if shared.disposed.load(Ordering::Acquire) {
        return Ok(0);
    }
    let mut cursor = shared
        .cursor
        .try_lock_for(wait_timeout)
        .ok_or_else(|| HermesError::timeout("receive gate"))?;

    let book = LogBook::decode_or_empty(&region.read()?);
    let read_from = *cursor;
    *cursor = book.last_id;

    let mut delivered = 0u64;
    let subscribers = shared.subscribers.lock();
    for entry in &book.entries {
        if entry.id <= read_from {
            continue;
        }
        if entry.instance == instance_id {
            continue;
        }
        if entry.message.is_empty() {
            // Cannot occur in a validly decoded book; kept as a guard.
            continue;
        }
        for tx in subscribers.values() {
            // Unbounded channel: the send cannot block, and a receiver
            // dropped mid-pass is simply skipped.
            let _ = tx.send(entry.clone());
        }
        delivered += 1;
    }
    drop(subscribers);

    if delivered > 0 {
        shared.received.fetch_add(delivered, Ordering::AcqRel);
    }
    Ok(delivered)
}

/// Background worker draining one publish call's queue into the log.
struct PublishWorker {
    region: Arc<dyn SharedRegion>,
    shared: Arc<BusShared>,
    instance_id: Uuid,
    min_message_age: Duration,
    cancel: CancelToken,
}

impl PublishWorker {
    fn run(self, mut queue: VecDeque<Vec<u8>>) -> HermesResult<()> {
        let max = self.region.max_payload_size();
        let min_age_ns = self.min_message_age.as_nanos() as u64;

        while !queue.is_empty() {
            if self.cancel.is_canceled() || self.shared.shutdown.is_canceled() {
                return Err(HermesError::Canceled);
            }

            let mut appended = 0u64;
            self.region.read_modify_write(&mut |current| {
                let mut book = LogBook::decode_or_empty(&current);

                // Trim the prefix of entries old enough to discard. Retained
                // entries keep their ids.
                let now = monotonic_ns();
                let horizon = now.saturating_sub(min_age_ns);
                while book
                    .entries
                    .front()
                    .is_some_and(|e| e.timestamp_ns < horizon)
                {
                    book.entries.pop_front();
                }

                // Append as much of the queue as the capacity and the write
                // slot allow. One timestamp per pass keeps the batch's
                // entries indistinguishable by age.
                let mut size = book.encoded_len();
                let slot = Instant::now();
                while slot.elapsed() < WRITE_SLOT_BUDGET {
                    let Some(front) = queue.front() else { break };
                    if front.is_empty() {
                        queue.pop_front();
                        continue;
                    }
                    let cost = entry_overhead() + front.len();
                    if size + cost > max {
                        break;
                    }
                    let Some(message) = queue.pop_front() else { break };
                    book.last_id += 1;
                    book.entries.push_back(LogEntry {
                        id: book.last_id,
                        instance: self.instance_id,
                        timestamp_ns: now,
                        message,
                    });
                    size += cost;
                    appended += 1;
                }

                book.encode()
            })?;

            if appended > 0 {
                self.shared.published.fetch_add(appended, Ordering::AcqRel);
            }
            if !queue.is_empty() {
                std::thread::sleep(FULL_LOG_BACKOFF);
            }
        }
        Ok(())
    }
}
