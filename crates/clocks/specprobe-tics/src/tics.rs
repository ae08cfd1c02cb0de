use log::{debug, info};
use specprobe_core::clock::Clock;
use specprobe_core::util::{CancelableJoinHandle, spawn_cancelable};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Errors of the tic-counter worker.
#[derive(Debug, Error)]
pub enum TicError {
    /// The worker thread could not be spawned.
    #[error("Failed to spawn tic worker: {0}")]
    Spawn(#[from] std::io::Error),
    /// The worker thread panicked.
    #[error("Tic worker panicked")]
    WorkerPanicked,
}

/// Single-writer, multi-reader counter with bounded staleness.
///
/// Only one thread may call [`StaleCounter::tick`]. Increments are a relaxed
/// load followed by a relaxed store, not an atomic read-modify-write, and
/// readers get no ordering guarantee beyond eventual visibility.
#[derive(Debug, Default)]
pub struct StaleCounter(AtomicU64);

impl StaleCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the counter by one. Single writer only.
    #[inline(always)]
    pub fn tick(&self) {
        let v = self.0.load(Ordering::Relaxed);
        self.0.store(v.wrapping_add(1), Ordering::Relaxed);
    }

    /// Reads a possibly stale count.
    #[inline(always)]
    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Clock backed by a background thread that ticks a [`StaleCounter`].
///
/// Dropping the counter signals the worker to stop; use
/// [`TicCounter::stop`] to also wait for it.
pub struct TicCounter {
    counter: Arc<StaleCounter>,
    worker: CancelableJoinHandle<u64>,
}

impl TicCounter {
    /// Spawns the worker and starts counting.
    ///
    /// # Errors
    ///
    /// Returns [`TicError::Spawn`] if the thread cannot be created.
    pub fn start() -> Result<Self, TicError> {
        let counter = Arc::new(StaleCounter::new());
        let writer = Arc::clone(&counter);
        let worker = spawn_cancelable("tic-counter", move |running| {
            while running.is_running() {
                writer.tick();
            }
            writer.read()
        })?;
        info!("Started tic counter");
        Ok(TicCounter { counter, worker })
    }

    /// Current (approximate) tic count.
    #[inline(always)]
    pub fn tics(&self) -> u64 {
        self.counter.read()
    }

    /// Stops the worker and returns the final count.
    ///
    /// # Errors
    ///
    /// Returns [`TicError::WorkerPanicked`] if the worker died.
    pub fn stop(self) -> Result<u64, TicError> {
        let tics = self
            .worker
            .join()
            .map_err(|_| TicError::WorkerPanicked)?;
        debug!("Tic counter stopped at {}", tics);
        Ok(tics)
    }
}

impl Clock for TicCounter {
    #[inline(always)]
    fn now(&self) -> u64 {
        self.tics()
    }

    fn unit(&self) -> &'static str {
        "tics"
    }
}

/// Samples `clock` after each of `samples` busy-work steps and returns the
/// `samples - 1` differences between consecutive readings.
pub fn sample_deltas(clock: &impl Clock, samples: usize) -> Vec<u64> {
    let mut x = 0u32;
    let mut y = u32::MAX;
    let mut times = Vec::with_capacity(samples);
    for _ in 0..samples {
        x ^= u32::MAX;
        y ^= x;
        black_box(y);
        times.push(clock.now());
    }
    times.windows(2).map(|w| w[1].saturating_sub(w[0])).collect()
}
