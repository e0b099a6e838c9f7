//! # HERMES Core
//!
//! The core engine of HERMES, a brokerless broadcast message bus for
//! cooperating processes on one host.
//!
//! Publishers append short opaque byte messages to a size-bounded log kept
//! in named shared memory; every other participant subscribed to the same
//! bus name observes each message at most once, in publish order, typically
//! within milliseconds. There is no daemon: coordination happens entirely
//! through named kernel objects (two semaphores, two mappings) that every
//! participant opens by name.
//!
//! - **Communication**: the message bus, the shared-log region and codec
//! - **Memory**: named shared-memory mappings and the change signal
//! - **Sync**: the cross-process named read/write lock
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hermes_core::{BusConfig, MessageBus};
//!
//! # fn main() -> hermes_core::HermesResult<()> {
//! let bus = MessageBus::new(&BusConfig::new("telemetry"))?;
//!
//! let sub = bus.subscribe()?;
//! bus.publish(b"hello".to_vec())?.wait()?;
//!
//! for message in sub.take(1) {
//!     println!("{} bytes", message.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery contract
//!
//! At-most-once, FIFO, self-filtered: a participant never sees its own
//! messages and never sees a message twice, and entries arrive in global
//! publish order. Delivery is not guaranteed - entries older than the
//! configured minimum age may be trimmed before a slow participant reads
//! them, and nothing survives the last participant's exit.

pub mod communication;
pub mod config;
pub mod error;
pub mod memory;
pub mod sync;
pub(crate) mod utils;

// Re-export commonly used types for easy access
pub use communication::{
    entry_overhead, CancelToken, LogBook, LogEntry, MappedRegion, MessageBus, PublishHandle,
    SharedRegion, Subscription,
};
pub use config::BusConfig;
pub use error::{HermesError, HermesResult};
pub use memory::{ShmRegion, UpdateSignal};
pub use sync::NamedRwLock;
