//! Electrophysiological feature extraction from voltage traces.
//!
//! Spike detection works on upward threshold crossings and refines each
//! event to its peak sample, so a coarse dt still reports a usable spike
//! time. All times are in ms, voltages in mV, frequencies in Hz.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Membrane potential a spike must cross, mV.
pub const SPIKE_THRESHOLD_MV: f64 = 0.0;

/// Features the tuner can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// `1000 * (n - 1) / (t_last - t_first)` over spike peak times, Hz.
    MeanSpikeFrequency,
    /// Number of detected spikes, as f64.
    SpikeCount,
    /// Peak time of the first spike, ms.
    FirstSpikeTime,
    /// Frequency implied by the final interspike interval, Hz.
    LastSpikeFrequency,
    /// Maximum of the trace, mV.
    MaxVoltage,
    /// Minimum of the trace, mV.
    MinVoltage,
    /// Mean of the trace, mV.
    MeanVoltage,
    /// Mean width of complete spikes at the detection threshold, ms.
    SpikeWidth,
}

impl FeatureKind {
    pub fn name(&self) -> &'static str {
        match self {
            FeatureKind::MeanSpikeFrequency => "mean_spike_frequency",
            FeatureKind::SpikeCount => "spike_count",
            FeatureKind::FirstSpikeTime => "first_spike_time",
            FeatureKind::LastSpikeFrequency => "last_spike_frequency",
            FeatureKind::MaxVoltage => "max_voltage",
            FeatureKind::MinVoltage => "min_voltage",
            FeatureKind::MeanVoltage => "mean_voltage",
            FeatureKind::SpikeWidth => "spike_width",
        }
    }
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("{feature} needs at least {needed} spike(s), trace has {found}")]
    NotEnoughSpikes {
        feature: FeatureKind,
        needed: usize,
        found: usize,
    },
    #[error("{feature} requested from an empty trace")]
    EmptyTrace { feature: FeatureKind },
}

/// One detected action potential.
#[derive(Debug, Clone, Copy)]
pub struct Spike {
    /// Time of the peak sample, ms.
    pub peak_time_ms: f64,
    /// Voltage at the peak sample, mV.
    pub peak_v: f64,
    /// Upward threshold crossing, ms.
    pub onset_ms: f64,
    /// Downward threshold crossing, ms. Absent when the trace ends while
    /// still above threshold.
    pub offset_ms: Option<f64>,
}

/// Restrict a trace to `t >= start_ms`. Samples are assumed time-sorted.
pub fn window<'a>(times: &'a [f64], values: &'a [f64], start_ms: f64) -> (&'a [f64], &'a [f64]) {
    let from = times.partition_point(|&t| t < start_ms);
    (&times[from..], &values[from..])
}

/// Detect spikes as excursions above `threshold`, each reported at its
/// peak sample.
pub fn detect_spikes(times: &[f64], values: &[f64], threshold: f64) -> Vec<Spike> {
    let mut spikes = Vec::new();
    let mut above = values.first().is_some_and(|&v| v > threshold);
    let mut onset = 0usize;
    let mut peak = 0usize;
    for i in 1..values.len() {
        let v = values[i];
        if !above && v > threshold {
            above = true;
            onset = i;
            peak = i;
        } else if above {
            if v > values[peak] {
                peak = i;
            }
            if v <= threshold {
                above = false;
                spikes.push(Spike {
                    peak_time_ms: times[peak],
                    peak_v: values[peak],
                    onset_ms: times[onset],
                    offset_ms: Some(times[i]),
                });
            }
        }
    }
    // A spike cut off by the end of the trace still counts.
    if above && peak > 0 {
        spikes.push(Spike {
            peak_time_ms: times[peak],
            peak_v: values[peak],
            onset_ms: times[onset],
            offset_ms: None,
        });
    }
    spikes
}

/// Extract one feature from a (windowed) trace.
pub fn extract(feature: FeatureKind, times: &[f64], values: &[f64]) -> Result<f64, FeatureError> {
    use FeatureKind::*;
    match feature {
        MaxVoltage | MinVoltage | MeanVoltage => {
            if values.is_empty() {
                return Err(FeatureError::EmptyTrace { feature });
            }
        }
        _ => {}
    }
    match feature {
        MaxVoltage => Ok(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        MinVoltage => Ok(values.iter().copied().fold(f64::INFINITY, f64::min)),
        MeanVoltage => Ok(values.iter().sum::<f64>() / values.len() as f64),
        _ => {
            let spikes = detect_spikes(times, values, SPIKE_THRESHOLD_MV);
            spike_feature(feature, &spikes)
        }
    }
}

fn spike_feature(feature: FeatureKind, spikes: &[Spike]) -> Result<f64, FeatureError> {
    let need = |needed: usize| -> Result<(), FeatureError> {
        if spikes.len() < needed {
            Err(FeatureError::NotEnoughSpikes {
                feature,
                needed,
                found: spikes.len(),
            })
        } else {
            Ok(())
        }
    };
    match feature {
        FeatureKind::SpikeCount => Ok(spikes.len() as f64),
        FeatureKind::FirstSpikeTime => {
            need(1)?;
            Ok(spikes[0].peak_time_ms)
        }
        FeatureKind::MeanSpikeFrequency => {
            need(2)?;
            let span = spikes[spikes.len() - 1].peak_time_ms - spikes[0].peak_time_ms;
            Ok(1000.0 * (spikes.len() - 1) as f64 / span)
        }
        FeatureKind::LastSpikeFrequency => {
            need(2)?;
            let isi = spikes[spikes.len() - 1].peak_time_ms - spikes[spikes.len() - 2].peak_time_ms;
            Ok(1000.0 / isi)
        }
        FeatureKind::SpikeWidth => {
            let widths: Vec<f64> = spikes
                .iter()
                .filter_map(|s| s.offset_ms.map(|off| off - s.onset_ms))
                .collect();
            if widths.is_empty() {
                return Err(FeatureError::NotEnoughSpikes {
                    feature,
                    needed: 1,
                    found: 0,
                });
            }
            Ok(widths.iter().sum::<f64>() / widths.len() as f64)
        }
        _ => unreachable!("voltage statistics handled in extract"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat baseline at -65 mV with triangular spikes peaking at +30 mV.
    fn spike_train(peak_times: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let dt = 0.1;
        let total = 500.0;
        let n = (total / dt) as usize;
        let mut times = Vec::with_capacity(n);
        let mut values = Vec::with_capacity(n);
        for i in 0..n {
            let t = i as f64 * dt;
            let mut v: f64 = -65.0;
            for &p in peak_times {
                let d = (t - p).abs();
                if d < 1.0 {
                    v = v.max(30.0 - 95.0 * d);
                }
            }
            times.push(t);
            values.push(v);
        }
        (times, values)
    }

    #[test]
    fn detects_every_spike_at_its_peak() {
        let (times, values) = spike_train(&[100.0, 200.0, 300.0]);
        let spikes = detect_spikes(&times, &values, SPIKE_THRESHOLD_MV);
        assert_eq!(spikes.len(), 3);
        for (spike, expected) in spikes.iter().zip([100.0, 200.0, 300.0]) {
            assert!((spike.peak_time_ms - expected).abs() < 0.2);
            assert!(spike.peak_v > 25.0);
            assert!(spike.offset_ms.is_some());
        }
    }

    #[test]
    fn mean_frequency_from_peak_span() {
        let (times, values) = spike_train(&[100.0, 200.0, 300.0]);
        let f = extract(FeatureKind::MeanSpikeFrequency, &times, &values).unwrap();
        assert!((f - 10.0).abs() < 0.1);
    }

    #[test]
    fn last_frequency_uses_final_interval() {
        let (times, values) = spike_train(&[100.0, 300.0, 350.0]);
        let f = extract(FeatureKind::LastSpikeFrequency, &times, &values).unwrap();
        assert!((f - 20.0).abs() < 0.2);
    }

    #[test]
    fn spike_count_on_silent_trace_is_zero() {
        let times: Vec<f64> = (0..1000).map(|i| i as f64 * 0.1).collect();
        let values = vec![-65.0; 1000];
        assert_eq!(extract(FeatureKind::SpikeCount, &times, &values).unwrap(), 0.0);
    }

    #[test]
    fn frequency_needs_two_spikes() {
        let (times, values) = spike_train(&[100.0]);
        let err = extract(FeatureKind::MeanSpikeFrequency, &times, &values).unwrap_err();
        assert!(matches!(
            err,
            FeatureError::NotEnoughSpikes {
                needed: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn window_drops_transient() {
        let (times, values) = spike_train(&[50.0, 200.0, 300.0]);
        let (wt, wv) = window(&times, &values, 100.0);
        assert_eq!(
            extract(FeatureKind::SpikeCount, wt, wv).unwrap(),
            2.0
        );
        assert!(wt[0] >= 100.0);
    }

    #[test]
    fn voltage_statistics() {
        let times = vec![0.0, 1.0, 2.0, 3.0];
        let values = vec![-70.0, -60.0, -50.0, -60.0];
        assert_eq!(extract(FeatureKind::MaxVoltage, &times, &values).unwrap(), -50.0);
        assert_eq!(extract(FeatureKind::MinVoltage, &times, &values).unwrap(), -70.0);
        assert_eq!(extract(FeatureKind::MeanVoltage, &times, &values).unwrap(), -60.0);
    }

    #[test]
    fn truncated_final_spike_has_no_width() {
        let dt = 0.1;
        let times: Vec<f64> = (0..1000).map(|i| i as f64 * dt).collect();
        // Rises above threshold near the end and never comes back down.
        let values: Vec<f64> = times
            .iter()
            .map(|&t| if t > 95.0 { 20.0 } else { -65.0 })
            .collect();
        let spikes = detect_spikes(&times, &values, SPIKE_THRESHOLD_MV);
        assert_eq!(spikes.len(), 1);
        assert!(spikes[0].offset_ms.is_none());
        assert!(extract(FeatureKind::SpikeWidth, &times, &values).is_err());
    }

    #[test]
    fn empty_trace_statistics_fail() {
        assert!(matches!(
            extract(FeatureKind::MeanVoltage, &[], &[]),
            Err(FeatureError::EmptyTrace { .. })
        ));
    }
}
