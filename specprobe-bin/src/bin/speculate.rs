use anyhow::Result;
use clap::{Parser, ValueEnum};
use indicatif::MultiProgress;
use log::{info, warn};
use serde::Serialize;
use specprobe_bin::args::ProbeArgs;
use specprobe_bin::{ClockJob, init_logging_with_progress, run_with_clock, save_json};
use specprobe_core::clock::Clock;
use specprobe_core::report::to_micros;
use specprobe_core::{
    AttackMode, Experiment, ExperimentConfig, ExperimentData, Probe, ProbeConfig, StoreLayout,
};

#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
enum ModeArg {
    /// One long attack sequence, scanned after every target reference
    Interleaved,
    /// Flush, train, observe once, scan; repeated
    FixedRound,
}

/// CLI arguments for the `speculate` binary.
#[derive(Debug, Parser, Serialize, Clone)]
struct CliArgs {
    /// Secret bytes stored in the restricted region.
    #[clap(long = "secret", default_value = "ABCDEFGHIJ")]
    secret: String,
    /// Size of the unrestricted region.
    #[clap(long = "unrestricted", default_value = "10")]
    unrestricted: usize,
    /// Size of the restricted region.
    #[clap(long = "restricted", default_value = "10")]
    restricted: usize,
    /// Experiment shape.
    #[clap(long = "mode", value_enum, default_value = "interleaved")]
    mode: ModeArg,
    /// Average training references per target reference (interleaved).
    #[clap(long = "train-ratio", default_value = "1000")]
    train_ratio: usize,
    /// Expected number of target references (interleaved).
    #[clap(long = "repetitions", default_value = "1000")]
    repetitions: usize,
    /// Number of rounds (fixed-round).
    #[clap(long = "rounds", default_value = "1000")]
    rounds: u64,
    /// Training references per round (fixed-round).
    #[clap(long = "batch", default_value = "1000")]
    batch: usize,
    /// Restricted index to probe. Defaults to the first restricted index.
    #[clap(long = "target")]
    target: Option<usize>,
    /// Restricted index observed instead of the target on half the rounds (fixed-round).
    #[clap(long = "decoy")]
    decoy: Option<usize>,
    /// Seed for sequence generation.
    #[clap(long = "seed")]
    seed: Option<u64>,
    #[clap(flatten)]
    probe: ProbeArgs,
    /// Output file for results (JSON format).
    #[clap(long = "output")]
    output: Option<String>,
    /// Disable progress bars.
    #[clap(long = "no-progress")]
    no_progress: bool,
}

impl CliArgs {
    fn experiment_config(&self) -> ExperimentConfig {
        let mode = match self.mode {
            ModeArg::Interleaved => AttackMode::Interleaved {
                train_ratio: self.train_ratio,
                repetitions: self.repetitions,
            },
            ModeArg::FixedRound => AttackMode::FixedRound {
                rounds: self.rounds,
                training_batch: self.batch,
                decoy: self.decoy,
            },
        };
        ExperimentConfig {
            mode,
            target: self.target,
            seed: self.seed,
        }
    }
}

#[derive(Serialize)]
struct SpeculateOutput<'a> {
    args: &'a CliArgs,
    probe: ProbeConfig,
    data: ExperimentData,
}

struct SpeculateJob {
    probe: ProbeConfig,
    layout: StoreLayout,
    secret: Vec<u8>,
    config: ExperimentConfig,
    progress: Option<MultiProgress>,
}

impl ClockJob for SpeculateJob {
    type Output = ExperimentData;

    fn run<C: Clock>(self, clock: C) -> Result<ExperimentData> {
        let probe = Probe::with_clock(self.probe, clock)?;
        let mut builder = Experiment::builder()
            .probe(probe)
            .layout(self.layout)
            .secret(self.secret)
            .config(self.config);
        if let Some(progress) = self.progress {
            builder = builder.progress(progress);
        }
        Ok(builder.build()?.run()?)
    }
}

fn main() -> Result<()> {
    let progress = init_logging_with_progress()?;

    let args = CliArgs::parse();
    info!("CLI args: {:?}", args);

    let probe = args.probe.probe_config()?;
    let job = SpeculateJob {
        probe: probe.clone(),
        layout: StoreLayout {
            unrestricted: args.unrestricted,
            restricted: args.restricted,
        },
        secret: args.secret.as_bytes().to_vec(),
        config: args.experiment_config(),
        progress: (!args.no_progress).then_some(progress),
    };
    let data = run_with_clock(args.probe.clock, job)?;

    println!("{}", data.report);
    println!("Hits/misses: {}", data.bands);
    let leak = data.leak;
    match leak.latency {
        Some(latency) if data.report.unit == "ns" => println!(
            "Target {} holds secret slot {}: {} ns ({:.3} us)",
            leak.target,
            leak.secret_slot,
            latency,
            to_micros(latency)
        ),
        Some(latency) => println!(
            "Target {} holds secret slot {}: {} {}",
            leak.target, leak.secret_slot, latency, data.report.unit
        ),
        None => warn!(
            "Secret slot {} of target {} is outside the observable array",
            leak.secret_slot, leak.target
        ),
    }
    if data.report.lowest.iter().any(|r| r.index == leak.secret_slot) {
        info!("Secret slot {} is among the fastest slots", leak.secret_slot);
    }
    info!(
        "Observed the target {} times",
        data.target_observations
    );

    if let Some(output_file) = &args.output {
        save_json(
            output_file,
            &SpeculateOutput {
                args: &args,
                probe,
                data,
            },
        )?;
    }
    Ok(())
}
