// HERMES Update Signal - named cross-process change notification
//
// A manual-reset event pulsed from another process cannot be expressed
// portably on POSIX, so the signal is a monotonic generation counter in a
// small named mapping: writers bump it once per committed write, watchers
// poll it. Generations accumulate, so rapid back-to-back writers can never
// cost a watcher a wakeup.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::HermesResult;
use crate::memory::shm_region::ShmRegion;

/// Size of the signal mapping. One counter would fit in 8 bytes; a full
/// page keeps the object aligned with what the kernel allocates anyway.
const SIGNAL_REGION_SIZE: usize = 64;

/// A named change-notification cell shared by all bus participants.
///
/// [`UpdateSignal::pulse`] announces "the region changed"; watchers call
/// [`UpdateSignal::generation`] and treat any advance since their last
/// observation as a wakeup.
#[derive(Debug)]
pub struct UpdateSignal {
    region: ShmRegion,
}

impl UpdateSignal {
    /// Create or open the named signal cell.
    pub fn open(name: &str) -> HermesResult<Self> {
        let region = ShmRegion::open(name, SIGNAL_REGION_SIZE)?;
        Ok(Self { region })
    }

    #[inline]
    fn cell(&self) -> &AtomicU64 {
        // SAFETY: the mapping is at least 8 bytes, page-aligned (so also
        // 8-aligned), zero-initialized by its creator, and lives as long as
        // `self.region`. All access goes through atomic operations.
        unsafe { &*(self.region.base() as *const AtomicU64) }
    }

    /// Announce a committed write to every watcher on the host.
    #[inline]
    pub fn pulse(&self) {
        self.cell().fetch_add(1, Ordering::Release);
    }

    /// Current generation. Any advance relative to an earlier reading means
    /// at least one write was committed in between.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.cell().load(Ordering::Acquire)
    }

    /// Remove the backing name (tests only; see [`ShmRegion::unlink`]).
    pub fn unlink(&self) {
        self.region.unlink();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::shm_region::tests::unique_name;

    #[test]
    fn pulse_advances_generation() {
        let name = unique_name("hermes_test_signal");
        let signal = UpdateSignal::open(&name).expect("open signal");

        let g0 = signal.generation();
        signal.pulse();
        signal.pulse();
        assert_eq!(signal.generation(), g0 + 2);

        signal.unlink();
    }

    #[test]
    fn generations_shared_between_handles() {
        let name = unique_name("hermes_test_signal_shared");
        let a = UpdateSignal::open(&name).expect("open a");
        let b = UpdateSignal::open(&name).expect("open b");

        let seen = b.generation();
        a.pulse();
        assert_eq!(b.generation(), seen + 1, "handles must share the counter");

        a.unlink();
    }
}
