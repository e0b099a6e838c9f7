// HERMES Named Semaphore - RAII wrapper over POSIX sem_open
//
// Named semaphores are the host-global counting primitive underneath the
// bus's read/write lock. The name (without leading slash) is visible to
// every process on the host; sem_open with O_CREAT atomically creates the
// semaphore with its initial value or opens the existing one.

use std::ffi::CString;
use std::time::Duration;

use crate::error::{HermesError, HermesResult};

/// RAII handle to a POSIX named counting semaphore.
///
/// Dropping the handle closes it; the kernel object itself persists until
/// explicitly unlinked, which this type never does (removing the name while
/// other participants hold handles would split the bus).
#[derive(Debug)]
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: String,
    /// C form of the name, kept for diagnostics and unlink-by-tests.
    c_name: CString,
}

// SAFETY: sem_t handles may be used from any thread; POSIX semaphore
// operations are async-signal-safe and internally synchronized.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create or open the named semaphore `name` with `initial` permits.
    ///
    /// The initial value only applies when this call creates the semaphore;
    /// opening an existing one leaves its current count untouched.
    pub fn open(name: &str, initial: u32) -> HermesResult<Self> {
        let c_name = CString::new(format!("/{}", name)).map_err(|_| {
            HermesError::InvalidName(format!("semaphore name '{}' contains NUL", name))
        })?;

        // SAFETY: c_name is a valid NUL-terminated string; O_CREAT with mode
        // and value is the documented four-argument form of sem_open.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(HermesError::primitive(
                format!("sem_open('{}')", name),
                std::io::Error::last_os_error(),
            ));
        }

        Ok(Self {
            sem,
            name: name.to_string(),
            c_name,
        })
    }

    /// Take one permit, waiting at most `timeout`.
    ///
    /// A zero timeout degenerates to a try-acquire. Returns
    /// [`HermesError::Timeout`] when the permit could not be taken in time.
    pub fn wait(&self, timeout: Duration) -> HermesResult<()> {
        if timeout.is_zero() {
            // SAFETY: self.sem is a valid handle from sem_open.
            let rc = unsafe { libc::sem_trywait(self.sem) };
            if rc == 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EAGAIN) => Err(HermesError::timeout(self.name.clone())),
                _ => Err(HermesError::primitive(
                    format!("sem_trywait('{}')", self.name),
                    err,
                )),
            };
        }

        let deadline = Self::absolute_deadline(timeout);
        loop {
            // SAFETY: self.sem is valid; deadline is a normalized timespec.
            let rc = unsafe { libc::sem_timedwait(self.sem, &deadline) };
            if rc == 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Err(HermesError::timeout(self.name.clone())),
                _ => {
                    return Err(HermesError::primitive(
                        format!("sem_timedwait('{}')", self.name),
                        err,
                    ))
                }
            }
        }
    }

    /// Return one permit.
    pub fn post(&self) {
        // SAFETY: self.sem is a valid handle from sem_open.
        let rc = unsafe { libc::sem_post(self.sem) };
        if rc != 0 {
            // Overflow of SEM_VALUE_MAX; cannot happen with the bus's
            // bounded permit counts, but never silently swallow it.
            log::warn!(
                "sem_post('{}') failed: {}",
                self.name,
                std::io::Error::last_os_error()
            );
        }
    }

    /// The semaphore's host-global name (without the leading slash).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the backing name (tests only). Existing handles stay valid.
    pub fn unlink(&self) {
        // SAFETY: c_name is a valid NUL-terminated string.
        unsafe {
            libc::sem_unlink(self.c_name.as_ptr());
        }
    }

    /// sem_timedwait takes an absolute CLOCK_REALTIME deadline.
    fn absolute_deadline(timeout: Duration) -> libc::timespec {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: now is a valid out-pointer.
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
        }
        let mut sec = now.tv_sec + timeout.as_secs() as libc::time_t;
        let mut nsec = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
        if nsec >= 1_000_000_000 {
            sec += 1;
            nsec -= 1_000_000_000;
        }
        libc::timespec {
            tv_sec: sec,
            tv_nsec: nsec,
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: self.sem is a valid handle; close releases only our local
        // handle, never the kernel object other participants hold.
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::shm_region::tests::unique_name;

    #[test]
    fn take_and_return_permits() {
        let name = unique_name("hermes_test_sem");
        let sem = NamedSemaphore::open(&name, 2).expect("open");

        sem.wait(Duration::ZERO).expect("first permit");
        sem.wait(Duration::ZERO).expect("second permit");
        assert!(matches!(
            sem.wait(Duration::ZERO),
            Err(HermesError::Timeout(_))
        ));

        sem.post();
        sem.wait(Duration::ZERO).expect("returned permit is takeable");

        sem.post();
        sem.post();
        sem.unlink();
    }

    #[test]
    fn timed_wait_expires() {
        let name = unique_name("hermes_test_sem_timed");
        let sem = NamedSemaphore::open(&name, 0).expect("open");

        let start = std::time::Instant::now();
        let result = sem.wait(Duration::from_millis(50));
        assert!(matches!(result, Err(HermesError::Timeout(_))));
        assert!(
            start.elapsed() >= Duration::from_millis(40),
            "sem_timedwait returned too early: {:?}",
            start.elapsed()
        );

        sem.unlink();
    }

    #[test]
    fn second_open_shares_count() {
        let name = unique_name("hermes_test_sem_shared");
        let a = NamedSemaphore::open(&name, 1).expect("open a");
        // Initial value of a second open is ignored; the count is shared.
        let b = NamedSemaphore::open(&name, 99).expect("open b");

        a.wait(Duration::ZERO).expect("take via a");
        assert!(matches!(b.wait(Duration::ZERO), Err(HermesError::Timeout(_))));
        a.post();
        b.wait(Duration::ZERO).expect("take via b after a posted");

        b.post();
        a.unlink();
    }
}
