//! Small crate-internal helpers.

/// Monotonic clock reading in nanoseconds.
///
/// Uses `CLOCK_MONOTONIC`, which counts from boot on Linux and is therefore
/// comparable between processes on the same host. Entry timestamps and the
/// trim policy use this unit so wall-clock jumps cannot expire (or resurrect)
/// log entries.
#[inline]
pub(crate) fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid out-pointer; CLOCK_MONOTONIC is always available.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_ns_advances() {
        let a = monotonic_ns();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = monotonic_ns();
        assert!(b > a, "clock must advance: {} -> {}", a, b);
    }
}
