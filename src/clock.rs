//! Time sources
//!
//! Register timestamps use the system monotonic clock so readers in other
//! processes see the same time base. Recordings use wall-clock seconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Microseconds on the system-wide monotonic clock
#[cfg(unix)]
pub fn monotonic_micros() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return fallback_micros();
    }
    ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
}

/// Microseconds on the system-wide monotonic clock
#[cfg(not(unix))]
pub fn monotonic_micros() -> u64 {
    fallback_micros()
}

/// Process-local monotonic microseconds
fn fallback_micros() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    // Offset by one so a timestamp is never the zero of an unwritten block
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u64 + 1
}

/// Wall clock used by playback
pub trait Clock {
    /// Seconds since the Unix epoch
    fn now(&self) -> f64;

    fn sleep(&self, duration: Duration);
}

/// The real clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        unix_time()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_never_goes_back() {
        let a = monotonic_micros();
        std::thread::sleep(Duration::from_millis(2));
        let b = monotonic_micros();
        assert!(b > a);
        assert!(b - a >= 1_000);
    }

    #[test]
    fn test_unix_time_is_recent() {
        // 2020-01-01
        assert!(unix_time() > 1_577_836_800.0);
    }
}
