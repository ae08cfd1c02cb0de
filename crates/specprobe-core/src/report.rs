//! Latency reports and signal/noise bands.
//!
//! No thresholds are fitted here: a report is the raw accumulated vector, a
//! lowest-K ranking, and min/max bands over a caller-labeled signal set.

use itertools::{Itertools, MinMaxResult};
use serde::Serialize;
use std::fmt;

/// A slot together with its accumulated latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ranked {
    /// Logical slot
    pub index: usize,
    /// Accumulated latency of the slot
    pub latency: u64,
}

/// Returns the `k` slots with the smallest accumulated latency.
///
/// Slots are ordered by ascending latency; equal latencies keep ascending
/// index order.
///
/// # Examples
///
/// ```
/// use specprobe_core::report::lowest_k;
///
/// let ranked = lowest_k(&[50, 10, 30, 10], 3);
/// let indices: Vec<_> = ranked.iter().map(|r| r.index).collect();
/// assert_eq!(indices, vec![1, 3, 2]);
/// ```
pub fn lowest_k(latencies: &[u64], k: usize) -> Vec<Ranked> {
    latencies
        .iter()
        .enumerate()
        .sorted_by_key(|&(index, &latency)| (latency, index))
        .take(k)
        .map(|(index, &latency)| Ranked { index, latency })
        .collect()
}

/// Converts nanoseconds to microseconds for display.
pub fn to_micros(ns: u64) -> f64 {
    ns as f64 / 1_000.0
}

/// Full accumulated latency vector plus its lowest-K ranking.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyReport {
    /// Accumulated latency per slot
    pub latencies: Vec<u64>,
    /// Slots with the smallest accumulated latency, ascending
    pub lowest: Vec<Ranked>,
    /// Unit of the clock that produced the latencies
    pub unit: &'static str,
}

impl LatencyReport {
    /// Builds a report ranking the `k` lowest slots of `latencies`.
    pub fn new(latencies: Vec<u64>, k: usize, unit: &'static str) -> Self {
        let lowest = lowest_k(&latencies, k);
        LatencyReport {
            latencies,
            lowest,
            unit,
        }
    }

    /// Latency of slot `index`, if it exists.
    pub fn latency(&self, index: usize) -> Option<u64> {
        self.latencies.get(index).copied()
    }

    /// Splits the report into signal and noise bands.
    pub fn bands(&self, is_signal: impl Fn(usize) -> bool) -> Bands {
        Bands::split(&self.latencies, is_signal)
    }
}

impl fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, latency) in self.latencies.iter().enumerate() {
            writeln!(f, "{}: {} {}", i, latency, self.unit)?;
        }
        write!(
            f,
            "Lowest {}: {}",
            self.lowest.len(),
            self.lowest
                .iter()
                .map(|r| format!("{}: {} {}", r.index, r.latency, self.unit))
                .join(", ")
        )
    }
}

/// Closed latency interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Band {
    /// Smallest latency in the set
    pub low: u64,
    /// Largest latency in the set
    pub high: u64,
}

impl Band {
    fn of(latencies: impl Iterator<Item = u64>) -> Option<Band> {
        match latencies.minmax() {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(x) => Some(Band { low: x, high: x }),
            MinMaxResult::MinMax(low, high) => Some(Band { low, high }),
        }
    }
}

/// Min/max latency of the signal set versus every other slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bands {
    /// Band over slots labeled as signal (`None` if there are none)
    pub signal: Option<Band>,
    /// Band over the remaining slots (`None` if there are none)
    pub noise: Option<Band>,
}

impl Bands {
    /// Partitions `latencies` by `is_signal` and computes both bands.
    pub fn split(latencies: &[u64], is_signal: impl Fn(usize) -> bool) -> Bands {
        let (signal, noise): (Vec<_>, Vec<_>) = latencies
            .iter()
            .enumerate()
            .partition(|&(i, _)| is_signal(i));
        Bands {
            signal: Band::of(signal.into_iter().map(|(_, &l)| l)),
            noise: Band::of(noise.into_iter().map(|(_, &l)| l)),
        }
    }

    /// `Some(true)` if every signal slot is faster than every noise slot.
    pub fn separated(&self) -> Option<bool> {
        match (self.signal, self.noise) {
            (Some(signal), Some(noise)) => Some(signal.high < noise.low),
            _ => None,
        }
    }
}

impl fmt::Display for Bands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |band: Option<Band>| match band {
            Some(b) => format!("( Low: {}, High: {} )", b.low, b.high),
            None => "( empty )".to_string(),
        };
        writeln!(f, "Signal: {}", show(self.signal))?;
        write!(f, "Noise: {}", show(self.noise))
    }
}
