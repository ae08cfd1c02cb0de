//! Hit/miss calibration over a labeled signal set.
//!
//! Every round evicts the observable array, touches the signal slots, and
//! scans. Afterwards the signal slots should sit in a lower latency band than
//! every noise slot if the flush/measure cycle works on this machine.

use crate::clock::Clock;
use crate::probe::{Probe, ProbeError};
use crate::report::{Bands, LatencyReport};
use crate::util::named_progress_bar;
use indicatif::MultiProgress;
use log::info;
use serde::Serialize;
use std::collections::BTreeSet;

/// Outcome of a calibration run.
#[derive(Debug, Clone, Serialize)]
pub struct Calibration {
    /// Number of flush/touch/scan rounds
    pub rounds: u64,
    /// Slots touched every round
    pub signal: BTreeSet<usize>,
    /// Accumulated latencies and lowest-K ranking
    pub report: LatencyReport,
    /// Signal versus noise bands
    pub bands: Bands,
}

/// Runs `rounds` rounds of flush, touch `signal`, scan.
///
/// # Errors
///
/// Returns [`ProbeError::IndexOutOfRange`] before touching the probe if any
/// signal slot does not exist.
pub fn calibrate<C: Clock>(
    probe: &mut Probe<C>,
    signal: &BTreeSet<usize>,
    rounds: u64,
    progress: Option<&MultiProgress>,
) -> Result<Calibration, ProbeError> {
    let size = probe.observable_size();
    if let Some(&index) = signal.iter().find(|&&i| i >= size) {
        return Err(ProbeError::IndexOutOfRange { index, size });
    }
    info!("Calibrating {} rounds with signal slots {:?}", rounds, signal);
    let bar = named_progress_bar(progress, "Calibration round", rounds);
    for round in 0..rounds {
        probe.flush();
        for &slot in signal {
            probe.access(slot)?;
        }
        probe.scan();
        if let Some(bar) = &bar {
            bar.set_position(round + 1);
        }
    }
    if let Some(bar) = bar {
        bar.finish();
    }
    let report = probe.report();
    let bands = report.bands(|i| signal.contains(&i));
    info!("Calibration bands: {:?}", bands);
    Ok(Calibration {
        rounds,
        signal: signal.clone(),
        report,
        bands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{FlushStrategy, PostScan, ProbeConfig};

    fn probe() -> Probe {
        Probe::new(ProbeConfig {
            observable_size: 32,
            stride: 256,
            flush_size: 1 << 18,
            flush_offset: 256,
            flush_strategy: FlushStrategy::XorToggle,
            post_scan: PostScan::Nothing,
            seed: Some(1),
        })
        .unwrap()
    }

    #[test]
    fn test_calibration_shape() {
        let mut probe = probe();
        let signal = BTreeSet::from([2, 17]);
        let result = calibrate(&mut probe, &signal, 5, None).unwrap();
        assert_eq!(result.report.latencies.len(), 32);
        assert_eq!(result.report.lowest.len(), 3);
        assert!(result.bands.signal.is_some());
        assert!(result.bands.noise.is_some());
    }

    #[test]
    fn test_calibration_rejects_bad_signal() {
        let mut probe = probe();
        let signal = BTreeSet::from([2, 65]);
        let err = calibrate(&mut probe, &signal, 5, None).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::IndexOutOfRange { index: 65, size: 32 }
        ));
        // validation happens before any measurement
        assert!(probe.latencies().iter().all(|&l| l == 0));
    }
}
