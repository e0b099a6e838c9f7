//! Cross-process named locking for HERMES
//!
//! - [`NamedSemaphore`]: RAII handle to a POSIX named counting semaphore
//! - [`NamedRwLock`]: multi-reader / single-writer lock over a system-wide
//!   name, composed from a named binary mutex and a named counting semaphore
//!
//! These are the only true kernel waits in the engine; everything above them
//! uses in-process primitives.

pub(crate) mod rwlock;
pub(crate) mod semaphore;

pub use rwlock::{NamedRwLock, ReadGuard, WriteGuard, MUTEX_NAME_PREFIX, SEMAPHORE_NAME_PREFIX};
pub use semaphore::NamedSemaphore;
