//! Timestamp sources.
//!
//! This module defines the [`Clock`] trait that the cache-timing probe reads
//! around every measured access, together with the platform clocks shipped in
//! the core crate. Alternative clocks (such as the tic counter in
//! `specprobe-tics`) implement the same trait.

use std::time::Instant;

/// Trait for monotonic timestamp sources.
///
/// Implementors return a monotonically non-decreasing counter. The unit is
/// implementation-specific (nanoseconds, TSC cycles, tics); latencies are only
/// ever compared against other latencies from the same clock.
///
/// `now` is called twice around each measured memory access, so implementations
/// must not allocate, log, or block.
pub trait Clock {
    /// Reads the current timestamp.
    fn now(&self) -> u64;

    /// Short unit label used in reports.
    fn unit(&self) -> &'static str {
        "ticks"
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    #[inline(always)]
    fn now(&self) -> u64 {
        (**self).now()
    }

    fn unit(&self) -> &'static str {
        (**self).unit()
    }
}

/// The platform monotonic clock in nanoseconds since construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose zero is the current instant.
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline(always)]
    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn unit(&self) -> &'static str {
        "ns"
    }
}

/// Serializing time-stamp counter read (`rdtscp`).
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TscClock;

#[cfg(target_arch = "x86_64")]
impl Clock for TscClock {
    #[inline(always)]
    fn now(&self) -> u64 {
        let mut aux = 0;
        unsafe { std::arch::x86_64::__rdtscp(&mut aux) }
    }

    fn unit(&self) -> &'static str {
        "cycles"
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, MonotonicClock};

    #[test]
    fn test_monotonic_clock_never_goes_back() {
        let clock = MonotonicClock::new();
        let mut last = clock.now();
        for _ in 0..10_000 {
            let now = clock.now();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(clock.unit(), "ns");
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_tsc_advances() {
        use super::TscClock;
        let a = TscClock.now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(TscClock.now() > a);
    }
}
