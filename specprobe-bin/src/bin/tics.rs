use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::info;
use specprobe_bin::init_logging_with_progress;
use specprobe_tics::{TicCounter, sample_deltas};

/// CLI arguments for the `tics` binary.
///
/// Starts the tic counter and prints the difference between consecutive
/// readings, which bounds the resolution of the tic clock.
#[derive(Debug, Parser)]
struct CliArgs {
    /// Number of readings.
    #[clap(long = "samples", default_value = "100")]
    samples: usize,
    /// Time to let the counter run before sampling.
    #[clap(long = "warmup-ms", default_value = "2")]
    warmup_ms: u64,
}

fn main() -> Result<()> {
    init_logging_with_progress()?;

    let args = CliArgs::parse();
    info!("CLI args: {:?}", args);

    let tics = TicCounter::start()?;
    thread::sleep(Duration::from_millis(args.warmup_ms));
    let deltas = sample_deltas(&tics, args.samples);
    let total = tics.stop()?;

    for (i, d) in deltas.iter().enumerate() {
        println!("run {}: {} tics", i, d);
    }
    if let Some(max) = deltas.iter().max() {
        info!("Largest step {} tics, {} tics in total", max, total);
    }
    Ok(())
}
