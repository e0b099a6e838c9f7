//! The HERMES communication layer
//!
//! Everything between raw named memory and the caller-facing bus API:
//!
//! - [`traits::SharedRegion`]: the storage-slot abstraction the bus runs on
//! - [`MappedRegion`]: the production region over named OS objects
//! - [`LogBook`] / [`LogEntry`]: the serialized log and its codec
//! - [`MessageBus`]: broadcast publish/subscribe with at-most-once delivery
//! - [`Subscription`] / [`PublishHandle`] / [`CancelToken`]: caller handles
//! - [`testing::InMemoryRegion`]: in-process region for tests

pub mod bus;
pub mod logbook;
pub mod region;
pub mod subscription;
pub mod testing;
pub mod traits;

pub use bus::{MessageBus, MessageHandler};
pub use logbook::{entry_overhead, LogBook, LogEntry, LOG_HEADER_SIZE};
pub use region::{MappedRegion, REGION_NAME_PREFIX, SIGNAL_NAME_PREFIX};
pub use subscription::{CancelToken, PublishHandle, Subscription};
pub use traits::{SharedRegion, UpdateListener};
