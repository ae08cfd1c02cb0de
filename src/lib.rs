//! # Specprobe
//!
//! Facade over the specprobe workspace. The core harness is re-exported at the
//! top level; alternative clocks are available behind cargo features.
//!
//! - `tics`: the background tic-counter clock ([`specprobe_tics`]).

pub use specprobe_core::*;

#[cfg(feature = "tics")]
pub use specprobe_tics;
