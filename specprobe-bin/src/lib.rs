//! # Specprobe
//!
//! Command line front ends for the specprobe cache-timing harness.
//!
//! ## Binaries
//!
//! - `access_time`: flush, touch a fixed signal set, scan; report signal and noise bands.
//! - `speculate`: run the interleaved-sequence or fixed-round speculative experiment.
//! - `tics`: measure the resolution of the background tic counter.
//!
//! ```sh
//! cargo run --release --bin=access_time -- --rounds 700 --signal 2,65
//! cargo run --release --bin=speculate -- --mode fixed-round --secret ABCDEFGHIJ
//! ```
//!
//! Logging goes through `env_logger` (`RUST_LOG`, default `info`) and is routed
//! around the progress bars.
pub mod args;

use crate::args::ClockArg;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use log::info;
use serde::Serialize;
use specprobe_core::clock::{Clock, MonotonicClock};
use specprobe_tics::TicCounter;
use std::fs::File;
use std::io::{BufWriter, Write};

pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let level = logger.filter();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    log::set_max_level(level);
    Ok(progress)
}

/// Writes `value` as pretty JSON to `filename`.
pub fn save_json(filename: &str, value: &impl Serialize) -> anyhow::Result<()> {
    let file = File::create(filename)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    info!("Results saved to {}", filename);
    Ok(())
}

/// A measurement job that can run against any [`Clock`].
pub trait ClockJob {
    /// Result of the job.
    type Output;

    /// Runs the job with `clock` as the probe's timestamp source.
    fn run<C: Clock>(self, clock: C) -> anyhow::Result<Self::Output>;
}

/// Runs `job` with the clock selected on the command line.
///
/// The tic counter is started before and stopped after the job.
pub fn run_with_clock<J: ClockJob>(clock: ClockArg, job: J) -> anyhow::Result<J::Output> {
    match clock {
        ClockArg::Monotonic => job.run(MonotonicClock::new()),
        #[cfg(target_arch = "x86_64")]
        ClockArg::Tsc => job.run(specprobe_core::clock::TscClock),
        #[cfg(not(target_arch = "x86_64"))]
        ClockArg::Tsc => anyhow::bail!("The TSC clock is only available on x86_64"),
        ClockArg::Tics => {
            let tics = TicCounter::start()?;
            let output = job.run(&tics);
            let total = tics.stop()?;
            info!("Tic counter reached {} tics", total);
            output
        }
    }
}
