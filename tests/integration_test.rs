use std::collections::BTreeSet;

use specprobe::calibration::calibrate;
use specprobe::clock::{Clock, MonotonicClock};
use specprobe::util::Rng;
use specprobe::{
    AttackMode, Experiment, ExperimentConfig, ExperimentError, FlushStrategy, PostScan, Probe,
    ProbeConfig, RestrictedStore, StoreLayout,
};
use specprobe_tics::TicCounter;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_probe_config() -> ProbeConfig {
    ProbeConfig {
        observable_size: 256,
        stride: 16,
        flush_size: 1 << 16,
        flush_offset: 64,
        flush_strategy: FlushStrategy::RandomTouch,
        post_scan: PostScan::Nothing,
        seed: Some(7),
    }
}

#[test]
fn test_store_never_exposes_secret() -> anyhow::Result<()> {
    init_logging();
    let mut store = RestrictedStore::new(StoreLayout::default())?;
    store.prepare(b"ABCDEFGHIJ")?;
    let mut rng = Rng::from_seed(1);
    for _ in 0..10_000 {
        let index = rng.below(64);
        let value = store.read_unrestricted(index);
        if index < 10 {
            assert_eq!(value as usize, index);
        } else {
            assert_eq!(value, 0);
        }
    }
    Ok(())
}

#[test]
fn test_probe_accumulates_through_scans() -> anyhow::Result<()> {
    init_logging();
    let mut probe = Probe::with_clock(small_probe_config(), MonotonicClock::new())?;
    let mut previous = probe.latencies().to_vec();
    for _ in 0..5 {
        probe.flush();
        probe.access(3)?;
        probe.scan();
        let current = probe.latencies().to_vec();
        assert!(current.iter().zip(&previous).all(|(c, p)| c >= p));
        previous = current;
    }
    let report = probe.report();
    assert_eq!(report.latencies.len(), 256);
    assert_eq!(report.lowest.len(), 3);
    Ok(())
}

#[test]
fn test_experiment_rejects_unrestricted_target() -> anyhow::Result<()> {
    init_logging();
    let probe = Probe::new(small_probe_config())?;
    let result = Experiment::builder()
        .probe(probe)
        .secret("ABCDEFGHIJ")
        .config(ExperimentConfig {
            target: Some(3),
            ..Default::default()
        })
        .build();
    assert!(matches!(
        result,
        Err(ExperimentError::IndexNotRestricted { index: 3, .. })
    ));
    Ok(())
}

#[test]
fn test_experiment_with_tic_clock() -> anyhow::Result<()> {
    init_logging();
    let tics = TicCounter::start()?;
    let probe = Probe::with_clock(small_probe_config(), &tics)?;
    let data = Experiment::builder()
        .probe(probe)
        .secret("ABCDEFGHIJ")
        .config(ExperimentConfig {
            mode: AttackMode::FixedRound {
                rounds: 20,
                training_batch: 50,
                decoy: None,
            },
            target: Some(10),
            seed: Some(42),
        })
        .build()?
        .run()?;
    tics.stop()?;

    assert_eq!(data.target_observations, 20);
    assert_eq!(data.report.unit, "tics");
    assert_eq!(data.leak.secret_slot, b'A' as usize);
    assert_eq!(data.seed, 42);
    Ok(())
}

#[test]
fn test_interleaved_targets_are_bounded() -> anyhow::Result<()> {
    init_logging();
    let probe = Probe::new(small_probe_config())?;
    let data = Experiment::builder()
        .probe(probe)
        .secret("ABCDEFGHIJ")
        .config(ExperimentConfig {
            mode: AttackMode::Interleaved {
                train_ratio: 20,
                repetitions: 30,
            },
            target: Some(15),
            seed: Some(3),
        })
        .build()?
        .run()?;
    assert!(data.target_observations <= 30);
    assert_eq!(data.leak.secret_slot, b'F' as usize);
    Ok(())
}

/// Needs quiet, cache-coherent hardware; the timing assertion is not
/// meaningful in emulators or busy CI machines.
#[test]
#[ignore]
fn test_calibration_separates_signal() -> anyhow::Result<()> {
    init_logging();
    let mut probe = Probe::new(ProbeConfig::default())?;
    let signal = BTreeSet::from([2, 65]);
    let calibration = calibrate(&mut probe, &signal, 700, None)?;
    let signal_band = calibration.bands.signal.expect("signal band");
    let noise_band = calibration.bands.noise.expect("noise band");
    assert!(
        signal_band.high < noise_band.low,
        "{}",
        calibration.bands
    );
    assert!(
        calibration
            .report
            .lowest
            .iter()
            .take(2)
            .all(|r| signal.contains(&r.index))
    );
    assert_eq!(probe.clock().unit(), "ns");
    Ok(())
}
