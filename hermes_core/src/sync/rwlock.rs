// HERMES Named Read/Write Lock
//
// Coordinates shared-region access across processes: up to N concurrent
// readers, writers exclusive. Composed from two host-global named
// semaphores plus a local latch:
//
// - mutex (named, 1 permit): serializes acquisition attempts host-wide
// - semaphore (named, N permits): one permit per reader; a writer drains
//   all N
// - local latch (in-process): serializes attempts made through the *same*
//   instance so one participant cannot over-commit its own capacity from
//   multiple threads
//
// Acquisition order is always local latch -> named mutex -> permit(s),
// never the reverse. Holding the mutex while permits are taken is what
// makes writer acquisition deadlock-free: a reader cannot slip a permit in
// between the writer's permits because it would need the same mutex.

use parking_lot::{Mutex, MutexGuard};
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::error::{HermesError, HermesResult};
use crate::sync::semaphore::NamedSemaphore;

/// Name prefix of the acquisition mutex kernel object.
pub const MUTEX_NAME_PREFIX: &str = "TinyReadWriteLock_Mutex_";

/// Name prefix of the reader-permit semaphore kernel object.
pub const SEMAPHORE_NAME_PREFIX: &str = "TinyReadWriteLock_Semaphore_";

/// Multi-reader / single-writer lock over a system-wide name.
///
/// Every participant opens a `NamedRwLock` with the same name and reader
/// count; the kernel objects are created on first open. Guards returned by
/// [`Self::acquire_read`] / [`Self::acquire_write`] release on every exit
/// path, including panics.
#[derive(Debug)]
pub struct NamedRwLock {
    name: String,
    /// Serializes acquisitions made through this instance. Guards hold it
    /// for their whole lifetime; cross-process reader concurrency comes
    /// from distinct instances.
    local: Mutex<()>,
    mutex: ManuallyDrop<NamedSemaphore>,
    semaphore: ManuallyDrop<NamedSemaphore>,
    max_reader_count: u32,
    wait_timeout: Duration,
    readers_held: AtomicU32,
    writer_held: AtomicBool,
}

impl NamedRwLock {
    /// Create or open the named lock for `name`.
    pub fn open(name: &str, max_reader_count: u32, wait_timeout: Duration) -> HermesResult<Self> {
        if max_reader_count == 0 {
            return Err(HermesError::InvalidReaderCount(
                "max_reader_count must be at least 1".into(),
            ));
        }
        let mutex = NamedSemaphore::open(&format!("{}{}", MUTEX_NAME_PREFIX, name), 1)?;
        let semaphore = NamedSemaphore::open(
            &format!("{}{}", SEMAPHORE_NAME_PREFIX, name),
            max_reader_count,
        )?;
        Ok(Self {
            name: name.to_string(),
            local: Mutex::new(()),
            mutex: ManuallyDrop::new(mutex),
            semaphore: ManuallyDrop::new(semaphore),
            max_reader_count,
            wait_timeout,
            readers_held: AtomicU32::new(0),
            writer_held: AtomicBool::new(false),
        })
    }

    /// Acquire a shared (read) lock.
    ///
    /// Takes the local latch, then the named mutex, then one permit, and
    /// releases the mutex before returning. Any step timing out after the
    /// first unwinds everything taken so far and fails with
    /// [`HermesError::Timeout`].
    pub fn acquire_read(&self) -> HermesResult<ReadGuard<'_>> {
        let local = self.lock_local()?;
        self.mutex.wait(self.wait_timeout)?;

        match self.semaphore.wait(self.wait_timeout) {
            Ok(()) => {
                self.mutex.post();
                self.readers_held.fetch_add(1, Ordering::Release);
                Ok(ReadGuard {
                    lock: self,
                    _local: local,
                })
            }
            Err(e) => {
                // Release the mutex first, then the latch (guard drop).
                self.mutex.post();
                Err(e)
            }
        }
    }

    /// Acquire an exclusive (write) lock by draining every reader permit.
    ///
    /// The named mutex is held for the whole drain, so no reader can take a
    /// permit between ours. A timeout on any permit returns all permits
    /// taken so far before failing.
    pub fn acquire_write(&self) -> HermesResult<WriteGuard<'_>> {
        let local = self.lock_local()?;
        self.mutex.wait(self.wait_timeout)?;

        for taken in 0..self.max_reader_count {
            if let Err(e) = self.semaphore.wait(self.wait_timeout) {
                for _ in 0..taken {
                    self.semaphore.post();
                }
                self.mutex.post();
                return Err(e);
            }
        }

        self.mutex.post();
        self.writer_held.store(true, Ordering::Release);
        Ok(WriteGuard {
            lock: self,
            _local: local,
        })
    }

    /// Whether this instance currently holds at least one read lock.
    pub fn is_reader_held(&self) -> bool {
        self.readers_held.load(Ordering::Acquire) > 0
    }

    /// Whether this instance currently holds the write lock.
    pub fn is_writer_held(&self) -> bool {
        self.writer_held.load(Ordering::Acquire)
    }

    /// The bus name this lock was opened for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close the local handles, failing with [`HermesError::Timeout`] when a
    /// guard from this instance is still alive.
    ///
    /// On timeout the handles are leaked (and the leak logged) rather than
    /// closed out from under a live guard; the kernel objects themselves are
    /// untouched either way.
    pub fn dispose(self) -> HermesResult<()> {
        if self.local.try_lock_for(self.wait_timeout).is_none() {
            let name = self.name.clone();
            drop(self); // Drop logs and leaks the handles
            return Err(HermesError::timeout(format!("disposing lock '{}'", name)));
        }
        Ok(()) // Drop re-takes the (free) latch and closes the handles
    }

    /// Remove the backing kernel names (tests only).
    pub fn unlink(&self) {
        self.mutex.unlink();
        self.semaphore.unlink();
    }

    fn lock_local(&self) -> HermesResult<MutexGuard<'_, ()>> {
        self.local
            .try_lock_for(self.wait_timeout)
            .ok_or_else(|| HermesError::timeout(format!("lock latch '{}'", self.name)))
    }
}

impl Drop for NamedRwLock {
    fn drop(&mut self) {
        // Never close the named handles while a guard from this instance is
        // alive: the guard's release would then post through a dangling
        // handle. Leaking until process exit is the safe failure mode.
        match self.local.try_lock_for(self.wait_timeout) {
            Some(_quiescent) => {
                // SAFETY: dropped exactly once, here; the None arm leaks
                // instead of dropping.
                unsafe {
                    ManuallyDrop::drop(&mut self.mutex);
                    ManuallyDrop::drop(&mut self.semaphore);
                }
            }
            None => {
                log::warn!(
                    "named lock '{}' dropped while held; leaking semaphore handles",
                    self.name
                );
            }
        }
    }
}

/// Shared-lock guard. Releasing returns the permit, then the local latch.
#[must_use = "the read lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a> {
    lock: &'a NamedRwLock,
    _local: MutexGuard<'a, ()>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.readers_held.fetch_sub(1, Ordering::Release);
        self.lock.semaphore.post();
        // _local drops afterwards, releasing the latch last.
    }
}

/// Exclusive-lock guard. Releasing returns every permit, then the latch.
#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a NamedRwLock,
    _local: MutexGuard<'a, ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.writer_held.store(false, Ordering::Release);
        for _ in 0..self.lock.max_reader_count {
            self.lock.semaphore.post();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::shm_region::tests::unique_name;

    fn open_n(name: &str, readers: u32, timeout: Duration, n: usize) -> Vec<NamedRwLock> {
        (0..n)
            .map(|_| NamedRwLock::open(name, readers, timeout).expect("open lock"))
            .collect()
    }

    #[test]
    fn read_then_write_from_one_instance() {
        let name = unique_name("hermes_test_rwlock_basic");
        let lock = NamedRwLock::open(&name, 3, Duration::from_secs(1)).unwrap();

        {
            let _r = lock.acquire_read().expect("read");
            assert!(lock.is_reader_held());
            assert!(!lock.is_writer_held());
        }
        assert!(!lock.is_reader_held());

        {
            let _w = lock.acquire_write().expect("write");
            assert!(lock.is_writer_held());
        }
        assert!(!lock.is_writer_held());

        // All permits must have been returned for a second full drain.
        let _w = lock.acquire_write().expect("write again");

        lock.unlink();
    }

    #[test]
    fn reader_limit_enforced_across_instances() {
        let name = unique_name("hermes_test_rwlock_limit");
        let locks = open_n(&name, 2, Duration::ZERO, 3);

        let r1 = locks[0].acquire_read().expect("first reader");
        let _r2 = locks[1].acquire_read().expect("second reader");
        assert!(matches!(
            locks[2].acquire_read(),
            Err(HermesError::Timeout(_))
        ));

        drop(r1);
        let _r3 = locks[2].acquire_read().expect("third reader after release");

        locks[0].unlink();
    }

    #[test]
    fn writer_excludes_readers_and_writers() {
        let name = unique_name("hermes_test_rwlock_excl");
        let locks = open_n(&name, 2, Duration::ZERO, 3);

        let w = locks[0].acquire_write().expect("writer");
        assert!(matches!(
            locks[1].acquire_read(),
            Err(HermesError::Timeout(_))
        ));
        assert!(matches!(
            locks[2].acquire_write(),
            Err(HermesError::Timeout(_))
        ));

        drop(w);
        let _r = locks[1].acquire_read().expect("reader after writer released");

        locks[0].unlink();
    }

    #[test]
    fn reader_blocks_writer_until_released() {
        let name = unique_name("hermes_test_rwlock_rw");
        let locks = open_n(&name, 2, Duration::ZERO, 2);

        let r = locks[0].acquire_read().expect("reader");
        assert!(matches!(
            locks[1].acquire_write(),
            Err(HermesError::Timeout(_))
        ));
        // The failed write drain must have returned its partial permits.
        drop(r);
        let _w = locks[1].acquire_write().expect("writer after reader left");

        locks[0].unlink();
    }

    #[test]
    fn dispose_succeeds_when_quiescent() {
        let name = unique_name("hermes_test_rwlock_dispose");
        let lock = NamedRwLock::open(&name, 1, Duration::from_millis(100)).unwrap();
        let peer = NamedRwLock::open(&name, 1, Duration::from_millis(100)).unwrap();

        {
            let _r = lock.acquire_read().unwrap();
        }
        lock.dispose().expect("quiescent dispose");

        // The kernel objects survive for the remaining participant.
        let _r = peer.acquire_read().expect("peer still functional");
        drop(_r);
        peer.unlink();
    }
}
