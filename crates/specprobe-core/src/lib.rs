//! # Specprobe Core
//!
//! `specprobe-core` is the measurement library behind the specprobe harness.
//! It times single memory accesses to tell cached from evicted cache lines and
//! drives experiments that try to observe speculative reads of a restricted
//! table through that timing signal.
//!
//! ## Architecture Overview
//!
//! - [`clock::Clock`] - Timestamp source read around every measured access.
//!   Alternative clocks (such as `specprobe-tics`) plug in through this trait.
//!
//! - [`Probe`] - The cache-timing probe: an observable array with one slot per
//!   cache line, a flush buffer for eviction, and per-slot accumulated latencies.
//!
//! - [`RestrictedStore`] - The two-part table whose only accessor refuses to
//!   return restricted entries.
//!
//! - [`SequenceGenerator`] - Randomized interleavings of training and target
//!   references.
//!
//! - [`Experiment`] - The orchestrator combining the above into either the
//!   interleaved-sequence or the fixed-round experiment.
//!
//! - [`calibration`] - The flush/touch/scan loop over a labeled signal set.
//!
//! ## Caveat
//!
//! The speculative experiments are exploratory. The accumulated latencies are
//! reported as measured; no claim is made that the restricted byte becomes
//! visible on any particular machine.

#![warn(missing_docs)]

pub mod calibration;
pub mod clock;
mod experiment;
mod probe;
pub mod report;
mod sequence;
mod store;
pub mod util;

pub use crate::experiment::{
    AttackMode, Experiment, ExperimentBuilder, ExperimentConfig, ExperimentData, ExperimentError,
    LeakProbe,
};
pub use crate::probe::{FlushStrategy, PostScan, Probe, ProbeConfig, ProbeError};
pub use crate::sequence::SequenceGenerator;
pub use crate::store::{RestrictedStore, StoreError, StoreLayout};
