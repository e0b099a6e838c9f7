//! Backend-agnostic region abstraction
//!
//! The bus only needs a byte-addressable, capacity-bounded storage slot with
//! mediated access and a change event. Modeling that as a trait keeps the
//! engine testable against a pure in-memory region (see
//! [`crate::communication::testing::InMemoryRegion`]) while production uses
//! the named-shared-memory [`crate::communication::MappedRegion`].

use crate::error::HermesResult;

/// Callback invoked after a committed write to the region.
pub type UpdateListener = Box<dyn Fn() + Send + Sync>;

/// A fixed-capacity shared storage slot with read/write mediation and
/// change notification.
///
/// All methods are safe to call from any thread. `read` returns the current
/// payload bytes; `write` and `read_modify_write` replace them atomically
/// with respect to every other participant and then fire the update
/// listeners of *all* participants.
pub trait SharedRegion: Send + Sync {
    /// Capacity in bytes for the payload.
    fn max_payload_size(&self) -> usize;

    /// Current payload length, read under a shared lock.
    fn payload_size(&self) -> HermesResult<u32>;

    /// Snapshot of the current payload, read under a shared lock.
    fn read(&self) -> HermesResult<Vec<u8>>;

    /// Replace the payload under an exclusive lock, then notify.
    ///
    /// Fails with [`crate::HermesError::PayloadTooLarge`] before touching
    /// the region when the payload exceeds the capacity.
    fn write(&self, payload: &[u8]) -> HermesResult<()>;

    /// Transform the payload under one exclusive lock acquisition, then
    /// notify. The transform receives the current payload and returns the
    /// replacement, which is subject to the same capacity check.
    fn read_modify_write(
        &self,
        transform: &mut dyn FnMut(Vec<u8>) -> Vec<u8>,
    ) -> HermesResult<()>;

    /// Register a listener fired after every committed write (local or from
    /// another process). Returns a token for [`Self::remove_update_listener`].
    fn add_update_listener(&self, listener: UpdateListener) -> usize;

    /// Unregister a previously added listener. Unknown tokens are ignored.
    fn remove_update_listener(&self, id: usize);

    /// Stop the region's background machinery and mark it disposed; later
    /// operations fail with [`crate::HermesError::Disposed`]. Local handles
    /// only - kernel objects shared with other participants are untouched.
    fn dispose(&self) -> HermesResult<()>;
}
