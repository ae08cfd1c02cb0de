//! The cache-timing probe.
//!
//! A [`Probe`] owns three buffers:
//! - the *observable array*, whose logical slots are spread `stride` elements
//!   apart so that every slot lives on its own cache line (and, with the
//!   default stride, its own page),
//! - the *flush buffer*, a scratch area much larger than the cache whose write
//!   sweep evicts the observable slots between measurement rounds,
//! - the *accumulated latency vector*, one additive counter per slot.
//!
//! Cached slots show a tight, low-latency distribution across trials while
//! evicted slots show a wider, higher one. Summing over many trials is the
//! only noise reduction performed here.

use crate::clock::{Clock, MonotonicClock};
use crate::report::LatencyReport;
use crate::util::{
    CL_SIZE, FLUSH_OFFSET, FLUSH_SIZE, LOWEST_K, OBSERVABLE_SIZE, OBSERVABLE_STRIDE, Rng,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{Ordering, compiler_fence};
use thiserror::Error;

/// Errors raised by probe construction and slot access.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// A logical slot outside `[0, size)` was addressed.
    #[error("Slot index {index} out of range for observable array of size {size}")]
    IndexOutOfRange {
        /// Requested slot
        index: usize,
        /// Number of slots in the observable array
        size: usize,
    },
    /// The probe configuration cannot be realized.
    #[error("Invalid probe config: {0}")]
    InvalidConfig(String),
    /// Reading a configuration file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Parsing a configuration file failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Eviction policy used by [`Probe::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlushStrategy {
    /// Toggle every element; past the offset also toggle element `i / (i % 8)`.
    #[default]
    XorToggle,
    /// Toggle every element; past the offset also toggle one random element.
    RandomTouch,
}

/// Hook executed right after every [`Probe::scan`].
///
/// Quiescing deferred memory-management work after the sweep tightens the
/// miss-latency distribution on some systems. This is non-portable tuning, not
/// part of the measurement itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostScan {
    /// Do nothing.
    Nothing,
    /// Yield the measuring thread to the scheduler.
    Yield,
    /// Return free heap pages to the OS (`malloc_trim`, glibc only; no-op elsewhere).
    #[default]
    TrimHeap,
}

impl PostScan {
    fn run(self) {
        match self {
            PostScan::Nothing => {}
            PostScan::Yield => std::thread::yield_now(),
            PostScan::TrimHeap => trim_heap(),
        }
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn trim_heap() {
    unsafe {
        libc::malloc_trim(0);
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn trim_heap() {}

/// Probe layout and tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Number of logical slots (N)
    pub observable_size: usize,
    /// Distance between consecutive slots, in `u32` elements
    pub stride: usize,
    /// Flush buffer length, in `u32` elements
    pub flush_size: usize,
    /// Index after which the flush sweep adds its secondary touch
    pub flush_offset: usize,
    /// Eviction policy
    pub flush_strategy: FlushStrategy,
    /// Hook executed after every scan
    pub post_scan: PostScan,
    /// Seed for the flush RNG (`None` = fresh entropy)
    pub seed: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            observable_size: OBSERVABLE_SIZE,
            stride: OBSERVABLE_STRIDE,
            flush_size: FLUSH_SIZE,
            flush_offset: FLUSH_OFFSET,
            flush_strategy: FlushStrategy::default(),
            post_scan: PostScan::default(),
            seed: None,
        }
    }
}

impl ProbeConfig {
    /// Loads a probe configuration from a JSON file.
    ///
    /// Missing fields take their default value.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_jsonfile(filepath: impl AsRef<Path>) -> Result<ProbeConfig, ProbeError> {
        let file = File::open(filepath)?;
        let config = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ProbeError> {
        if self.observable_size == 0 {
            return Err(ProbeError::InvalidConfig(
                "observable_size must be non-zero".into(),
            ));
        }
        if self.stride.saturating_mul(size_of::<u32>()) < CL_SIZE {
            return Err(ProbeError::InvalidConfig(format!(
                "stride of {} elements is smaller than a cache line ({} bytes)",
                self.stride, CL_SIZE
            )));
        }
        if self.flush_size == 0 {
            return Err(ProbeError::InvalidConfig(
                "flush_size must be non-zero".into(),
            ));
        }
        if self.flush_size.checked_mul(size_of::<u32>()).is_none() {
            return Err(ProbeError::InvalidConfig(
                "flush buffer size overflows".into(),
            ));
        }
        if self
            .stride
            .checked_mul(self.observable_size + 1)
            .and_then(|n| n.checked_mul(size_of::<u32>()))
            .is_none()
        {
            return Err(ProbeError::InvalidConfig(
                "observable array size overflows".into(),
            ));
        }
        Ok(())
    }

    fn observable_len(&self) -> usize {
        self.stride * (self.observable_size + 1)
    }
}

/// Cache-timing probe over an observable array and a flush buffer.
///
/// All operations take `&mut self`: the measurement path is single threaded
/// and any concurrent writer would invalidate the timing signal.
///
/// # Type Parameters
///
/// * `C` - Timestamp source (implements [`Clock`])
pub struct Probe<C: Clock = MonotonicClock> {
    config: ProbeConfig,
    observable: Vec<u32>,
    flush: Vec<u32>,
    latencies: Vec<u64>,
    rng: Rng,
    clock: C,
}

impl Probe<MonotonicClock> {
    /// Creates a probe timed by the platform monotonic clock.
    pub fn new(config: ProbeConfig) -> Result<Self, ProbeError> {
        Self::with_clock(config, MonotonicClock::new())
    }
}

impl<C: Clock> Probe<C> {
    /// Creates a probe timed by `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidConfig`] if the layout cannot guarantee one
    /// slot per cache line or a buffer would be empty.
    pub fn with_clock(config: ProbeConfig, clock: C) -> Result<Self, ProbeError> {
        config.validate()?;
        if config.flush_size * size_of::<u32>() < 4 << 20 {
            warn!(
                "Flush buffer of {} bytes is likely smaller than the last-level cache",
                config.flush_size * size_of::<u32>()
            );
        }
        let rng = match config.seed {
            Some(seed) => Rng::from_seed(seed),
            None => Rng::from_entropy(),
        };
        let observable = vec![0u32; config.observable_len()];
        let flush = vec![0u32; config.flush_size];
        let latencies = vec![0u64; config.observable_size];
        info!(
            "Allocated probe: {} slots, stride {} B, flush buffer {} B, {:?}, {:?}",
            config.observable_size,
            config.stride * size_of::<u32>(),
            config.flush_size * size_of::<u32>(),
            config.flush_strategy,
            config.post_scan,
        );
        Ok(Probe {
            config,
            observable,
            flush,
            latencies,
            rng,
            clock,
        })
    }

    /// The configuration this probe was built from.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Number of logical slots.
    pub fn observable_size(&self) -> usize {
        self.config.observable_size
    }

    /// The timestamp source.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// The running per-slot latency totals.
    pub fn latencies(&self) -> &[u64] {
        &self.latencies
    }

    fn offset(&self, index: usize) -> Result<usize, ProbeError> {
        if index >= self.config.observable_size {
            return Err(ProbeError::IndexOutOfRange {
                index,
                size: self.config.observable_size,
            });
        }
        Ok((index + 1) * self.config.stride)
    }

    /// Sweeps the flush buffer to evict the observable slots.
    ///
    /// Never reads or writes the observable array.
    pub fn flush(&mut self) {
        let offset = self.config.flush_offset;
        let buf = self.flush.as_mut_slice();
        let len = buf.len();
        match self.config.flush_strategy {
            FlushStrategy::XorToggle => {
                for i in 0..len {
                    buf[i] ^= u32::MAX;
                    if i > offset && i % 8 > 0 {
                        buf[i / (i % 8)] ^= u32::MAX;
                    }
                }
            }
            FlushStrategy::RandomTouch => {
                for i in 0..len {
                    buf[i] ^= u32::MAX;
                    if i > offset {
                        buf[self.rng.below(len)] ^= u32::MAX;
                    }
                }
            }
        }
        std::hint::black_box(buf);
    }

    /// Brings slot `index` into the cache without timing it.
    pub fn access(&mut self, index: usize) -> Result<(), ProbeError> {
        let offset = self.offset(index)?;
        toggle(&mut self.observable[offset]);
        Ok(())
    }

    /// Times a single read-modify-write of slot `index`.
    ///
    /// Only the memory operation sits between the two clock reads.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::IndexOutOfRange`] if `index >= observable_size`.
    pub fn timed_access(&mut self, index: usize) -> Result<u64, ProbeError> {
        let offset = self.offset(index)?;
        Ok(self.time_offset(offset))
    }

    #[inline(always)]
    fn time_offset(&mut self, offset: usize) -> u64 {
        let cell = &mut self.observable[offset];
        let then = self.clock.now();
        toggle(cell);
        let now = self.clock.now();
        now.saturating_sub(then)
    }

    /// Times every slot once and adds the results to the latency vector.
    ///
    /// Runs the configured [`PostScan`] hook afterwards.
    pub fn scan(&mut self) {
        for i in 0..self.config.observable_size {
            let elapsed = self.time_offset((i + 1) * self.config.stride);
            self.latencies[i] = self.latencies[i].saturating_add(elapsed);
        }
        self.config.post_scan.run();
    }

    /// Returns the accumulated latencies together with the lowest
    /// [`LOWEST_K`] slots.
    ///
    /// The latency vector is not cleared; repeated calls observe the same
    /// running totals.
    pub fn report(&self) -> LatencyReport {
        let report = LatencyReport::new(self.latencies.clone(), LOWEST_K, self.clock.unit());
        info!(
            "Lowest {}: {}",
            LOWEST_K,
            report
                .lowest
                .iter()
                .map(|r| format!("{}: {} {}", r.index, r.latency, report.unit))
                .collect::<Vec<_>>()
                .join(", ")
        );
        debug!("Latencies: {:?}", report.latencies);
        report
    }
}

/// Volatile `^= !0` on a single element, fenced against compiler reordering.
#[inline(always)]
fn toggle(cell: &mut u32) {
    let p = cell as *mut u32;
    compiler_fence(Ordering::SeqCst);
    unsafe {
        ptr::write_volatile(p, ptr::read_volatile(p) ^ u32::MAX);
    }
    compiler_fence(Ordering::SeqCst);
}
