//! Command line arguments shared by the specprobe binaries.

use anyhow::Context;
use clap::{Args, ValueEnum};
use serde::Serialize;
use specprobe_core::{FlushStrategy, PostScan, ProbeConfig};

/// Eviction policy selectable from the command line.
#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
pub enum FlushArg {
    /// Toggle sweep with a stride-derived secondary touch
    XorToggle,
    /// Toggle sweep with a random secondary touch
    RandomTouch,
}

impl From<FlushArg> for FlushStrategy {
    fn from(value: FlushArg) -> Self {
        match value {
            FlushArg::XorToggle => FlushStrategy::XorToggle,
            FlushArg::RandomTouch => FlushStrategy::RandomTouch,
        }
    }
}

/// Post-scan hook selectable from the command line.
#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
pub enum PostScanArg {
    /// No hook
    Nothing,
    /// Yield to the scheduler
    Yield,
    /// Trim the heap (glibc only)
    TrimHeap,
}

impl From<PostScanArg> for PostScan {
    fn from(value: PostScanArg) -> Self {
        match value {
            PostScanArg::Nothing => PostScan::Nothing,
            PostScanArg::Yield => PostScan::Yield,
            PostScanArg::TrimHeap => PostScan::TrimHeap,
        }
    }
}

/// Timestamp source for the probe.
#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
pub enum ClockArg {
    /// Platform monotonic clock (ns)
    Monotonic,
    /// Time-stamp counter (x86_64 only)
    Tsc,
    /// Background tic counter
    Tics,
}

/// Probe options. Flags override fields of the optional JSON config.
#[derive(Debug, Args, Serialize, Clone)]
pub struct ProbeArgs {
    /// JSON probe config file.
    #[clap(long = "config")]
    pub config: Option<String>,
    /// Eviction policy.
    #[clap(long = "flush-strategy", value_enum)]
    pub flush_strategy: Option<FlushArg>,
    /// Hook executed after every scan.
    #[clap(long = "post-scan", value_enum)]
    pub post_scan: Option<PostScanArg>,
    /// Number of observable slots.
    #[clap(long = "observable-size")]
    pub observable_size: Option<usize>,
    /// Seed for the flush RNG.
    #[clap(long = "probe-seed")]
    pub seed: Option<u64>,
    /// Timestamp source.
    #[clap(long = "clock", value_enum, default_value = "monotonic")]
    pub clock: ClockArg,
}

impl ProbeArgs {
    /// Resolves the probe configuration from the config file and flags.
    pub fn probe_config(&self) -> anyhow::Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::from_jsonfile(path)
                .with_context(|| format!("failed to load probe config {}", path))?,
            None => ProbeConfig::default(),
        };
        if let Some(flush_strategy) = self.flush_strategy {
            config.flush_strategy = flush_strategy.into();
        }
        if let Some(post_scan) = self.post_scan {
            config.post_scan = post_scan.into();
        }
        if let Some(observable_size) = self.observable_size {
            config.observable_size = observable_size;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        Ok(config)
    }
}
