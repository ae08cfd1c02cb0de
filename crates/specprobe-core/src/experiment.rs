use crate::clock::{Clock, MonotonicClock};
use crate::probe::{Probe, ProbeError};
use crate::report::{Bands, LatencyReport};
use crate::sequence::SequenceGenerator;
use crate::store::{MAX_UNRESTRICTED, RestrictedStore, StoreError, StoreLayout};
use crate::util::{Rng, named_progress_bar};
use indicatif::MultiProgress;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

/// Shape of a speculative-access experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AttackMode {
    /// Walk one generated attack sequence; scan and flush after every target reference.
    Interleaved {
        /// Average number of training references per target reference
        train_ratio: usize,
        /// Expected number of target references
        repetitions: usize,
    },
    /// Flush, train on a fixed batch, observe the target once, scan; repeated `rounds` times.
    FixedRound {
        /// Number of rounds
        rounds: u64,
        /// Training references per round
        training_batch: usize,
        /// Alternative restricted index observed instead of the target with probability ½
        decoy: Option<usize>,
    },
}

impl Default for AttackMode {
    fn default() -> Self {
        AttackMode::Interleaved {
            train_ratio: 1000,
            repetitions: 1000,
        }
    }
}

/// Configuration parameters for an experiment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment shape
    pub mode: AttackMode,
    /// Restricted index to probe (`None` = first restricted index)
    pub target: Option<usize>,
    /// Seed for sequence generation and decoy choice (`None` = fresh entropy)
    pub seed: Option<u64>,
}

/// Errors raised while building or running an experiment.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// The requested target does not denote a restricted-region position.
    #[error("Index {index} does not refer to a restricted element (restricted range {range:?})")]
    IndexNotRestricted {
        /// Rejected index
        index: usize,
        /// Valid restricted range
        range: Range<usize>,
    },
    /// No probe was supplied to the builder.
    #[error("No probe specified")]
    MissingProbe,
    /// No secret was supplied to the builder.
    #[error("No secret specified")]
    MissingSecret,
    /// The configuration cannot be run.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// Populating the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A probe operation failed.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// What the probe saw at the slot the target byte would have touched.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LeakProbe {
    /// Restricted index that was probed
    pub target: usize,
    /// Ground-truth byte stored at the target, i.e. the slot a leak would warm
    pub secret_slot: usize,
    /// Accumulated latency of that slot (`None` if the slot is outside the probe)
    pub latency: Option<u64>,
}

/// Results of a speculative-access experiment.
#[derive(Debug, Serialize)]
pub struct ExperimentData {
    /// ISO 8601 timestamp of when the experiment ran
    pub date: String,
    /// Experiment shape
    pub mode: AttackMode,
    /// Seed of the experiment RNG
    pub seed: u64,
    /// Number of target references actually replayed
    pub target_observations: u64,
    /// Accumulated latencies and lowest-K ranking
    pub report: LatencyReport,
    /// Training slots (hits) versus every other slot (misses)
    pub bands: Bands,
    /// Latency at the slot of the true secret byte
    pub leak: LeakProbe,
}

/// Speculative-access orchestrator.
///
/// Owns the probe, the restricted store, and every random generator of one
/// run, so independent experiments never share state. Use
/// [`Experiment::builder()`] to construct one.
pub struct Experiment<C: Clock = MonotonicClock> {
    probe: Probe<C>,
    store: RestrictedStore,
    generator: SequenceGenerator,
    rng: Rng,
    mode: AttackMode,
    target: usize,
    progress: Option<MultiProgress>,
}

impl Experiment<MonotonicClock> {
    /// Creates a new experiment builder.
    pub fn builder() -> ExperimentBuilder<MonotonicClock> {
        ExperimentBuilder::default()
    }
}

impl<C: Clock> Experiment<C> {
    /// The probe driven by this experiment.
    pub fn probe(&self) -> &Probe<C> {
        &self.probe
    }

    /// The restricted index being probed.
    pub fn target(&self) -> usize {
        self.target
    }

    /// Resolves `index` through the unrestricted accessor and touches the resulting slot.
    #[inline(always)]
    fn observe(&mut self, index: usize) -> Result<(), ProbeError> {
        let slot = self.store.read_unrestricted(index) as usize;
        self.probe.access(slot)
    }

    fn run_interleaved(&mut self, train_ratio: usize, repetitions: usize) -> Result<u64, ProbeError> {
        let seq = self.generator.generate(train_ratio, self.target, repetitions);
        info!(
            "Replaying attack sequence of {} entries (train ratio {})",
            seq.len(),
            train_ratio
        );
        let bar = named_progress_bar(self.progress.as_ref(), "Attack sequence", seq.len() as u64);
        let mut observations = 0;
        self.probe.flush();
        for (pos, &index) in seq.iter().enumerate() {
            self.observe(index)?;
            if index == self.target {
                self.probe.scan();
                self.probe.flush();
                observations += 1;
            }
            if let Some(bar) = &bar
                && pos % 4096 == 0
            {
                bar.set_position(pos as u64);
            }
        }
        if let Some(bar) = bar {
            bar.finish();
        }
        Ok(observations)
    }

    fn run_fixed_rounds(
        &mut self,
        rounds: u64,
        training_batch: usize,
        decoy: Option<usize>,
    ) -> Result<u64, ProbeError> {
        let unrestricted = self.store.layout().unrestricted;
        info!(
            "Running {} rounds of {} training references",
            rounds, training_batch
        );
        let bar = named_progress_bar(self.progress.as_ref(), "Fixed round", rounds);
        let mut observations = 0;
        for round in 0..rounds {
            self.probe.flush();
            for j in 0..training_batch {
                self.observe(j % unrestricted)?;
            }
            let index = match decoy {
                Some(decoy) if self.rng.coin() => decoy,
                _ => self.target,
            };
            self.observe(index)?;
            if index == self.target {
                observations += 1;
            }
            self.probe.scan();
            if let Some(bar) = &bar {
                bar.set_position(round + 1);
            }
        }
        if let Some(bar) = bar {
            bar.finish();
        }
        debug!("{} of {} rounds observed the target", observations, rounds);
        Ok(observations)
    }

    /// Runs the configured experiment to its bound.
    ///
    /// All validation has already happened in [`ExperimentBuilder::build`];
    /// the only remaining failures are probe errors.
    pub fn run(mut self) -> Result<ExperimentData, ExperimentError> {
        let mode = self.mode;
        info!(
            "Starting {:?} experiment against restricted index {}",
            mode, self.target
        );
        let target_observations = match mode {
            AttackMode::Interleaved {
                train_ratio,
                repetitions,
            } => self.run_interleaved(train_ratio, repetitions)?,
            AttackMode::FixedRound {
                rounds,
                training_batch,
                decoy,
            } => self.run_fixed_rounds(rounds, training_batch, decoy)?,
        };
        let report = self.probe.report();
        let unrestricted = self.store.layout().unrestricted;
        let bands = report.bands(|i| i < unrestricted);
        let secret_slot = self.store.restricted_view()[self.target - unrestricted] as usize;
        let leak = LeakProbe {
            target: self.target,
            secret_slot,
            latency: report.latency(secret_slot),
        };
        info!("Hit/miss bands: {:?}", bands);
        info!("Leak probe: {:?}", leak);
        Ok(ExperimentData {
            date: chrono::Local::now().to_rfc3339(),
            mode,
            seed: self.rng.seed(),
            target_observations,
            report,
            bands,
            leak,
        })
    }
}

/// Builder for [`Experiment`].
pub struct ExperimentBuilder<C: Clock> {
    probe: Option<Probe<C>>,
    layout: StoreLayout,
    secret: Option<Vec<u8>>,
    config: ExperimentConfig,
    progress: Option<MultiProgress>,
}

impl Default for ExperimentBuilder<MonotonicClock> {
    fn default() -> Self {
        ExperimentBuilder {
            probe: None,
            layout: StoreLayout::default(),
            secret: None,
            config: ExperimentConfig::default(),
            progress: None,
        }
    }
}

impl<C: Clock> ExperimentBuilder<C> {
    /// Sets the probe, possibly changing its clock type.
    pub fn probe<C1: Clock>(self, probe: Probe<C1>) -> ExperimentBuilder<C1> {
        ExperimentBuilder {
            probe: Some(probe),
            layout: self.layout,
            secret: self.secret,
            config: self.config,
            progress: self.progress,
        }
    }

    /// Sets the store region sizes.
    pub fn layout(mut self, layout: StoreLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the secret written to the restricted region.
    pub fn secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Sets the experiment configuration.
    pub fn config(mut self, config: ExperimentConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables progress bars.
    pub fn progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    fn check_restricted(layout: &StoreLayout, index: usize) -> Result<(), ExperimentError> {
        if !layout.is_restricted(index) {
            return Err(ExperimentError::IndexNotRestricted {
                index,
                range: layout.restricted_range(),
            });
        }
        Ok(())
    }

    /// Validates the configuration and populates the store.
    ///
    /// # Errors
    ///
    /// * [`ExperimentError::IndexNotRestricted`] if the target or decoy lies outside the restricted region
    /// * [`StoreError::InputTooLarge`] if the secret does not fit the restricted region
    /// * [`ExperimentError::InvalidConfig`] for empty bounds, an attack sequence whose length
    ///   overflows, or a layout the probe cannot represent
    pub fn build(self) -> Result<Experiment<C>, ExperimentError> {
        let layout = self.layout;
        let probe = self.probe.ok_or(ExperimentError::MissingProbe)?;
        let secret = self.secret.ok_or(ExperimentError::MissingSecret)?;
        if layout.unrestricted == 0 || layout.restricted == 0 {
            return Err(ExperimentError::InvalidConfig(
                "both store regions must be non-empty".into(),
            ));
        }
        if layout.unrestricted > MAX_UNRESTRICTED || layout.unrestricted > probe.observable_size() {
            return Err(ExperimentError::InvalidConfig(format!(
                "unrestricted region of {} entries does not fit {} observable slots",
                layout.unrestricted,
                probe.observable_size().min(MAX_UNRESTRICTED)
            )));
        }
        let target = self.config.target.unwrap_or(layout.unrestricted);
        Self::check_restricted(&layout, target)?;
        match self.config.mode {
            AttackMode::Interleaved { repetitions: 0, .. } => {
                return Err(ExperimentError::InvalidConfig(
                    "repetitions must be non-zero".into(),
                ));
            }
            AttackMode::Interleaved {
                train_ratio,
                repetitions,
            } if SequenceGenerator::sequence_len(train_ratio, repetitions).is_none() => {
                return Err(ExperimentError::InvalidConfig(format!(
                    "attack sequence of ({} + 1) * {} entries overflows",
                    train_ratio, repetitions
                )));
            }
            AttackMode::FixedRound { rounds: 0, .. } => {
                return Err(ExperimentError::InvalidConfig(
                    "rounds must be non-zero".into(),
                ));
            }
            AttackMode::FixedRound {
                decoy: Some(decoy), ..
            } => {
                Self::check_restricted(&layout, decoy)?;
                if decoy == target {
                    return Err(ExperimentError::InvalidConfig(
                        "decoy must differ from the target".into(),
                    ));
                }
            }
            _ => {}
        }
        let mut store = RestrictedStore::new(layout)?;
        store.prepare(&secret)?;
        let mut rng = match self.config.seed {
            Some(seed) => Rng::from_seed(seed),
            None => Rng::from_entropy(),
        };
        let generator = SequenceGenerator::new(rng.fork(), layout.unrestricted);
        Ok(Experiment {
            probe,
            store,
            generator,
            rng,
            mode: self.config.mode,
            target,
            progress: self.progress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{FlushStrategy, PostScan, ProbeConfig};
    use std::cell::Cell;

    fn probe_config() -> ProbeConfig {
        ProbeConfig {
            observable_size: 256,
            stride: 16,
            flush_size: 1 << 16,
            flush_offset: 64,
            flush_strategy: FlushStrategy::RandomTouch,
            post_scan: PostScan::Nothing,
            seed: Some(3),
        }
    }

    fn probe() -> Probe {
        Probe::new(probe_config()).unwrap()
    }

    /// Advances by one per read, so every timed access costs exactly 1.
    #[derive(Default)]
    struct StepClock(Cell<u64>);

    impl Clock for StepClock {
        fn now(&self) -> u64 {
            let t = self.0.get() + 1;
            self.0.set(t);
            t
        }
    }

    fn step_probe() -> Probe<StepClock> {
        Probe::with_clock(probe_config(), StepClock::default()).unwrap()
    }

    fn config(mode: AttackMode, target: Option<usize>) -> ExperimentConfig {
        ExperimentConfig {
            mode,
            target,
            seed: Some(0xabc),
        }
    }

    #[test]
    fn test_target_must_be_restricted() {
        for bad in [0, 9, 20, 300] {
            let result = Experiment::builder()
                .probe(probe())
                .secret("ABCDEFGHIJ")
                .config(config(AttackMode::default(), Some(bad)))
                .build();
            assert!(
                matches!(result, Err(ExperimentError::IndexNotRestricted { index, .. }) if index == bad)
            );
        }
    }

    #[test]
    fn test_secret_too_large() {
        let result = Experiment::builder()
            .probe(probe())
            .secret("ABCDEFGHIJK")
            .build();
        assert!(matches!(
            result,
            Err(ExperimentError::Store(StoreError::InputTooLarge {
                len: 11,
                capacity: 10
            }))
        ));
    }

    #[test]
    fn test_missing_parts() {
        assert!(matches!(
            Experiment::builder().secret("A").build(),
            Err(ExperimentError::MissingProbe)
        ));
        assert!(matches!(
            Experiment::builder().probe(probe()).build(),
            Err(ExperimentError::MissingSecret)
        ));
    }

    #[test]
    fn test_invalid_decoy() {
        let mode = AttackMode::FixedRound {
            rounds: 1,
            training_batch: 1,
            decoy: Some(10),
        };
        assert!(matches!(
            Experiment::builder()
                .probe(probe())
                .secret("AB")
                .config(config(mode, Some(10)))
                .build(),
            Err(ExperimentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_interleaved_runs_to_bound() {
        let mode = AttackMode::Interleaved {
            train_ratio: 20,
            repetitions: 30,
        };
        let experiment = Experiment::builder()
            .probe(probe())
            .secret("ABCDEFGHIJ")
            .config(config(mode, None))
            .build()
            .unwrap();
        assert_eq!(experiment.target(), 10);
        let data = experiment.run().unwrap();
        assert_eq!(data.report.latencies.len(), 256);
        assert_eq!(data.leak.secret_slot, b'A' as usize);
        assert_eq!(data.seed, 0xabc);
        assert!(data.bands.signal.is_some());
        assert!(data.target_observations > 0);
    }

    #[test]
    fn test_interleaved_scans_once_per_target() {
        let (train_ratio, repetitions, seed) = (7, 50, 5);
        let expected = SequenceGenerator::new(Rng::from_seed(seed).fork(), 10)
            .generate(train_ratio, 10, repetitions)
            .iter()
            .filter(|&&i| i == 10)
            .count() as u64;
        assert!(expected > 0);

        let data = Experiment::builder()
            .probe(step_probe())
            .secret("ABCDEFGHIJ")
            .config(ExperimentConfig {
                mode: AttackMode::Interleaved {
                    train_ratio,
                    repetitions,
                },
                target: Some(10),
                seed: Some(seed),
            })
            .build()
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(data.target_observations, expected);
        // training references never scan, so every slot was timed once per target
        assert!(
            data.report
                .latencies
                .iter()
                .all(|&l| l == data.target_observations)
        );
    }

    #[test]
    fn test_fixed_round_scans_once_per_round() {
        let mode = AttackMode::FixedRound {
            rounds: 9,
            training_batch: 4,
            decoy: Some(15),
        };
        let data = Experiment::builder()
            .probe(step_probe())
            .secret("ABCDEFGHIJ")
            .config(config(mode, None))
            .build()
            .unwrap()
            .run()
            .unwrap();
        assert!(data.target_observations <= 9);
        assert!(data.report.latencies.iter().all(|&l| l == 9));
        assert_eq!(data.report.unit, "ticks");
    }

    #[test]
    fn test_overflowing_sequence_is_rejected() {
        for (train_ratio, repetitions) in [(usize::MAX, 1), (usize::MAX / 2, 3)] {
            let mode = AttackMode::Interleaved {
                train_ratio,
                repetitions,
            };
            assert!(matches!(
                Experiment::builder()
                    .probe(probe())
                    .secret("AB")
                    .config(config(mode, None))
                    .build(),
                Err(ExperimentError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_interleaved_is_reproducible() {
        let mode = AttackMode::Interleaved {
            train_ratio: 5,
            repetitions: 40,
        };
        let observations = |_| {
            Experiment::builder()
                .probe(probe())
                .secret("XY")
                .config(config(mode, Some(11)))
                .build()
                .unwrap()
                .run()
                .unwrap()
                .target_observations
        };
        assert_eq!(observations(0), observations(1));
    }

    #[test]
    fn test_fixed_round_counts_target() {
        let mode = AttackMode::FixedRound {
            rounds: 12,
            training_batch: 25,
            decoy: None,
        };
        let data = Experiment::builder()
            .probe(probe())
            .secret("ABCDEFGHIJ")
            .config(config(mode, Some(12)))
            .build()
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(data.target_observations, 12);
        assert_eq!(data.leak.secret_slot, b'C' as usize);
    }

    #[test]
    fn test_fixed_round_with_decoy() {
        let mode = AttackMode::FixedRound {
            rounds: 200,
            training_batch: 2,
            decoy: Some(15),
        };
        let data = Experiment::builder()
            .probe(probe())
            .secret("ABCDEFGHIJ")
            .config(config(mode, None))
            .build()
            .unwrap()
            .run()
            .unwrap();
        assert!(data.target_observations > 0);
        assert!(data.target_observations < 200);
    }

    #[test]
    fn test_mode_json() {
        let mode: AttackMode = serde_json::from_str(
            r#"{"kind": "fixed-round", "rounds": 3, "training_batch": 7, "decoy": null}"#,
        )
        .unwrap();
        assert_eq!(
            mode,
            AttackMode::FixedRound {
                rounds: 3,
                training_batch: 7,
                decoy: None
            }
        );
    }
}
