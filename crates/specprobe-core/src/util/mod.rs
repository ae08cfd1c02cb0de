//! Utility functions and types used throughout specprobe.
//!
//! This module provides:
//! - Layout and sizing constants ([`OBSERVABLE_SIZE`], [`FLUSH_SIZE`], [`CL_SIZE`], etc.)
//! - Random number generation ([`Rng`])
//! - Cancelable worker threads ([`spawn_cancelable`])
//! - Progress reporting utilities ([`NamedProgress`])

mod cancelable_thread;
mod constants;
mod named_progress;
mod rng;

pub use self::cancelable_thread::*;
pub use self::constants::*;
pub use self::named_progress::{NamedProgress, named_progress_bar};
pub use self::rng::Rng;

/// Creates a vector by applying a function to each index.
///
/// # Examples
///
/// ```
/// use specprobe_core::util::make_vec;
///
/// let identity = make_vec(4, |i| i as u8);
/// assert_eq!(identity, vec![0, 1, 2, 3]);
/// ```
pub fn make_vec<T>(n: usize, f: impl Fn(usize) -> T) -> Vec<T> {
    let mut v = Vec::with_capacity(n);
    for i in 0..n {
        v.push(f(i));
    }
    v
}
