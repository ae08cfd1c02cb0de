use std::collections::BTreeSet;

use anyhow::Result;
use clap::Parser;
use indicatif::MultiProgress;
use log::{info, warn};
use serde::Serialize;
use specprobe_bin::args::ProbeArgs;
use specprobe_bin::{ClockJob, init_logging_with_progress, run_with_clock, save_json};
use specprobe_core::calibration::{Calibration, calibrate};
use specprobe_core::clock::Clock;
use specprobe_core::{Probe, ProbeConfig};

/// CLI arguments for the `access_time` binary.
///
/// Flushes the probe, touches the signal slots, and scans, for a number of
/// rounds. A working flush/measure cycle shows every signal slot below every
/// noise slot.
#[derive(Debug, Parser, Serialize, Clone)]
struct CliArgs {
    /// Number of flush/touch/scan rounds.
    #[clap(long = "rounds", default_value = "700")]
    rounds: u64,
    /// Comma-separated slots touched every round.
    #[clap(long = "signal", value_delimiter = ',', default_values_t = [2usize, 65])]
    signal: Vec<usize>,
    #[clap(flatten)]
    probe: ProbeArgs,
    /// Output file for results (JSON format).
    #[clap(long = "output")]
    output: Option<String>,
    /// Disable progress bars.
    #[clap(long = "no-progress")]
    no_progress: bool,
}

#[derive(Serialize)]
struct CalibrationOutput<'a> {
    args: &'a CliArgs,
    config: ProbeConfig,
    calibration: Calibration,
}

struct CalibrationJob<'a> {
    config: ProbeConfig,
    signal: BTreeSet<usize>,
    rounds: u64,
    progress: Option<&'a MultiProgress>,
}

impl ClockJob for CalibrationJob<'_> {
    type Output = Calibration;

    fn run<C: Clock>(self, clock: C) -> Result<Calibration> {
        let mut probe = Probe::with_clock(self.config, clock)?;
        Ok(calibrate(
            &mut probe,
            &self.signal,
            self.rounds,
            self.progress,
        )?)
    }
}

fn main() -> Result<()> {
    let progress = init_logging_with_progress()?;

    let args = CliArgs::parse();
    info!("CLI args: {:?}", args);

    let config = args.probe.probe_config()?;
    let job = CalibrationJob {
        config: config.clone(),
        signal: args.signal.iter().copied().collect(),
        rounds: args.rounds,
        progress: (!args.no_progress).then_some(&progress),
    };
    let calibration = run_with_clock(args.probe.clock, job)?;

    println!("{}", calibration.report);
    println!("{}", calibration.bands);
    match calibration.bands.separated() {
        Some(true) => info!("Signal slots are separated from noise"),
        Some(false) => warn!("Signal and noise bands overlap"),
        None => warn!("Signal or noise set is empty"),
    }

    if let Some(output_file) = &args.output {
        save_json(
            output_file,
            &CalibrationOutput {
                args: &args,
                config,
                calibration,
            },
        )?;
    }
    Ok(())
}
