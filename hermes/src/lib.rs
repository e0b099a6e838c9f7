//! # HERMES - Host-Exclusive Relay for MESsaging
//!
//! HERMES is a brokerless broadcast message bus for cooperating processes on
//! the same host, built on named shared memory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hermes::prelude::*;
//!
//! # fn main() -> HermesResult<()> {
//! let bus = MessageBus::new(&BusConfig::new("telemetry"))?;
//! bus.publish(b"hello".to_vec())?.wait()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **No broker process** - coordination through named kernel objects
//! - **At-most-once, FIFO delivery** to every other participant
//! - **Bounded memory** - a capacity-capped log with age-based trimming
//! - **Crash-tolerant** - torn writes are detected and healed

// Re-export the whole core
pub use hermes_core::{self, *};

/// The HERMES prelude - everything you need to get started
///
/// Just add `use hermes::prelude::*;`.
pub mod prelude {
    // ============================================
    // Bus API
    // ============================================
    pub use hermes_core::communication::{
        CancelToken, LogBook, LogEntry, MessageBus, PublishHandle, Subscription,
    };

    // ============================================
    // Region seam (production + test double)
    // ============================================
    pub use hermes_core::communication::testing::InMemoryRegion;
    pub use hermes_core::communication::{MappedRegion, SharedRegion};

    // ============================================
    // Configuration
    // ============================================
    pub use hermes_core::config::BusConfig;

    // ============================================
    // Error Types
    // ============================================
    pub use hermes_core::error::{HermesError, HermesResult};

    // ============================================
    // Common Std Types
    // ============================================
    pub use std::sync::Arc;
    pub use std::time::{Duration, Instant};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get HERMES version
pub fn version() -> &'static str {
    VERSION
}
