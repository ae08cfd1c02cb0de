//! Tic-counter clock.
//!
//! This crate provides a rough alternative to the platform clock: a dedicated
//! worker thread increments a shared counter in a tight loop and the measuring
//! thread reads it without synchronization. The count advances roughly once per
//! loop iteration of the worker, so a "tic" has no fixed duration.
//!
//! Implements the [`specprobe_core::clock::Clock`] trait.
//!
//! # Staleness
//!
//! Reads are relaxed loads of a single-writer cell. A reader may observe a
//! value one or more increments behind the writer. Callers must treat tic
//! counts as approximate; this is acceptable for experimental resolution only.

#![warn(missing_docs)]

mod tics;

pub use tics::{StaleCounter, TicCounter, TicError, sample_deltas};
