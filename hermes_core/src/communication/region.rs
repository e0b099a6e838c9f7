//! Named shared-memory region with mediated access and change watching
//!
//! [`MappedRegion`] is the production [`SharedRegion`]: a named mapping of
//! `max_file_size + 4` bytes holding a little-endian `u32` payload length
//! followed by the payload, all access mediated by a [`NamedRwLock`], with
//! a named generation counter announcing committed writes to every
//! participant's watcher thread.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::communication::traits::{SharedRegion, UpdateListener};
use crate::error::{HermesError, HermesResult};
use crate::memory::{ShmRegion, UpdateSignal};
use crate::sync::NamedRwLock;

/// Name prefix of the shared-region kernel object.
pub const REGION_NAME_PREFIX: &str = "TinyMemoryMappedFile_MemoryMappedFile_";

/// Name prefix of the change-signal kernel object.
pub const SIGNAL_NAME_PREFIX: &str = "TinyMemoryMappedFile_WaitHandle_";

/// Bytes of the little-endian payload length header.
pub(crate) const LENGTH_HEADER_SIZE: usize = 4;

/// How often the watcher re-samples the generation counter.
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// State shared with the watcher thread.
struct WatchShared {
    signal: UpdateSignal,
    listeners: Mutex<HashMap<usize, UpdateListener>>,
    disposed: AtomicBool,
}

/// The production shared region over named OS objects.
///
/// Several `MappedRegion` instances (across processes or within one) opened
/// with the same name alias the same memory; each instance runs its own
/// watcher thread and keeps its own listener registry.
pub struct MappedRegion {
    name: String,
    max_payload: usize,
    shm: ShmRegion,
    lock: NamedRwLock,
    shared: Arc<WatchShared>,
    next_listener_id: AtomicUsize,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl MappedRegion {
    /// Create or open the named region for `name`.
    ///
    /// A freshly created region is zero-filled, so its payload length reads
    /// as 0 (the empty log).
    pub fn open(
        name: &str,
        max_file_size: usize,
        max_reader_count: u32,
        wait_timeout: Duration,
    ) -> HermesResult<Self> {
        if max_file_size == 0 || max_file_size > u32::MAX as usize {
            return Err(HermesError::InvalidCapacity(format!(
                "max_file_size {} out of range",
                max_file_size
            )));
        }

        let shm = ShmRegion::open(
            &format!("{}{}", REGION_NAME_PREFIX, name),
            max_file_size + LENGTH_HEADER_SIZE,
        )?;
        let signal = UpdateSignal::open(&format!("{}{}", SIGNAL_NAME_PREFIX, name))?;
        let lock = NamedRwLock::open(name, max_reader_count, wait_timeout)?;

        let shared = Arc::new(WatchShared {
            signal,
            listeners: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        });

        let watcher_shared = Arc::clone(&shared);
        let watcher = std::thread::Builder::new()
            .name(format!("hermes-watch-{}", name))
            .spawn(move || Self::watch(watcher_shared))
            .map_err(|e| HermesError::primitive("spawning region watcher", e))?;

        Ok(Self {
            name: name.to_string(),
            max_payload: max_file_size,
            shm,
            lock,
            shared,
            next_listener_id: AtomicUsize::new(1),
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// The bus name this region was opened for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove all four backing kernel names for a bus.
    ///
    /// Live participants keep working on the now-anonymous objects; later
    /// opens create fresh ones. Intended for tests and administrative
    /// cleanup - the bus itself never unlinks (see [`ShmRegion::unlink`]).
    pub fn clear_storage(name: &str) {
        let dir = crate::memory::shm_region::shm_base_dir();
        let _ = std::fs::remove_file(dir.join(format!("{}{}", REGION_NAME_PREFIX, name)));
        let _ = std::fs::remove_file(dir.join(format!("{}{}", SIGNAL_NAME_PREFIX, name)));
        for sem in [
            format!("{}{}", crate::sync::MUTEX_NAME_PREFIX, name),
            format!("{}{}", crate::sync::SEMAPHORE_NAME_PREFIX, name),
        ] {
            if let Ok(c_name) = std::ffi::CString::new(format!("/{}", sem)) {
                // SAFETY: c_name is a valid NUL-terminated string.
                unsafe {
                    libc::sem_unlink(c_name.as_ptr());
                }
            }
        }
    }

    /// Watcher loop: sample the shared generation counter and fire the
    /// listeners once per observed advance. Exits when the region is
    /// disposed; the poll interval bounds how stale that observation can be.
    fn watch(shared: Arc<WatchShared>) {
        log::debug!("region watcher started");
        let mut seen = shared.signal.generation();
        while !shared.disposed.load(Ordering::Acquire) {
            let current = shared.signal.generation();
            if current != seen {
                seen = current;
                for listener in shared.listeners.lock().values() {
                    listener();
                }
            } else {
                std::thread::sleep(WATCH_POLL_INTERVAL);
            }
        }
        log::debug!("region watcher exiting");
    }

    fn ensure_live(&self) -> HermesResult<()> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(HermesError::Disposed);
        }
        Ok(())
    }

    /// Read the length header and payload. Callers must hold the lock.
    fn read_unlocked(&self) -> Vec<u8> {
        let base = self.shm.base();
        let mut header = [0u8; LENGTH_HEADER_SIZE];
        // SAFETY: the mapping is at least LENGTH_HEADER_SIZE + max_payload
        // bytes and the caller holds the named lock, so no other participant
        // is writing these bytes.
        unsafe {
            ptr::copy_nonoverlapping(base, header.as_mut_ptr(), LENGTH_HEADER_SIZE);
        }
        // Clamp a corrupt header so callers never see out-of-range slices;
        // the codec rejects the resulting bytes and the bus self-heals.
        let len = (u32::from_le_bytes(header) as usize).min(self.max_payload);
        let mut payload = vec![0u8; len];
        // SAFETY: len <= max_payload, so the source range stays inside the
        // mapping; destination is a fresh Vec of exactly len bytes.
        unsafe {
            ptr::copy_nonoverlapping(base.add(LENGTH_HEADER_SIZE), payload.as_mut_ptr(), len);
        }
        payload
    }

    /// Store payload then length. Callers must hold the write lock.
    ///
    /// The length word is written last so a crash mid-copy leaves the old
    /// length paired with mixed bytes - which the codec then rejects -
    /// rather than a new length pointing at missing bytes.
    fn write_unlocked(&self, payload: &[u8]) {
        let base = self.shm.base();
        // SAFETY: payload.len() was checked against max_payload by the
        // caller; the write lock excludes every other participant.
        unsafe {
            ptr::copy_nonoverlapping(
                payload.as_ptr(),
                base.add(LENGTH_HEADER_SIZE),
                payload.len(),
            );
            let header = (payload.len() as u32).to_le_bytes();
            ptr::copy_nonoverlapping(header.as_ptr(), base, LENGTH_HEADER_SIZE);
        }
    }
}

impl SharedRegion for MappedRegion {
    fn max_payload_size(&self) -> usize {
        self.max_payload
    }

    fn payload_size(&self) -> HermesResult<u32> {
        self.ensure_live()?;
        let _guard = self.lock.acquire_read()?;
        let base = self.shm.base();
        let mut header = [0u8; LENGTH_HEADER_SIZE];
        // SAFETY: see read_unlocked.
        unsafe {
            ptr::copy_nonoverlapping(base, header.as_mut_ptr(), LENGTH_HEADER_SIZE);
        }
        Ok(u32::from_le_bytes(header))
    }

    fn read(&self) -> HermesResult<Vec<u8>> {
        self.ensure_live()?;
        let _guard = self.lock.acquire_read()?;
        Ok(self.read_unlocked())
    }

    fn write(&self, payload: &[u8]) -> HermesResult<()> {
        self.ensure_live()?;
        if payload.len() > self.max_payload {
            return Err(HermesError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }
        {
            let _guard = self.lock.acquire_write()?;
            self.write_unlocked(payload);
        }
        // Signal after the lock is released so woken readers can take the
        // read lock immediately.
        self.shared.signal.pulse();
        Ok(())
    }

    fn read_modify_write(
        &self,
        transform: &mut dyn FnMut(Vec<u8>) -> Vec<u8>,
    ) -> HermesResult<()> {
        self.ensure_live()?;
        {
            let _guard = self.lock.acquire_write()?;
            let current = self.read_unlocked();
            let next = transform(current);
            if next.len() > self.max_payload {
                return Err(HermesError::PayloadTooLarge {
                    size: next.len(),
                    max: self.max_payload,
                });
            }
            self.write_unlocked(&next);
        }
        self.shared.signal.pulse();
        Ok(())
    }

    fn add_update_listener(&self, listener: UpdateListener) -> usize {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.lock().insert(id, listener);
        id
    }

    fn remove_update_listener(&self, id: usize) {
        self.shared.listeners.lock().remove(&id);
    }

    fn dispose(&self) -> HermesResult<()> {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(watcher) = self.watcher.lock().take() {
            let _ = watcher.join();
        }
        Ok(())
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        let _ = self.dispose();
        // shm, signal and lock handles close with their fields; the named
        // kernel objects persist for the remaining participants.
    }
}
