//! Channel demultiplexing.
//!
//! One raw column round-robins samples across `P` excitation wavelengths. The
//! phase carrying the brightest excitation is found from the reference column
//! after the warm-up prefix is discarded; the remaining roles follow in the
//! configured rotational order. Every column, and the time base, is then split
//! at those phases.

use std::collections::BTreeMap;

use crate::prelude::{
    PartialCyclePolicy, ProcessingStage, StageConfig, StageError, StageResult,
};
use crate::recording::{
    DeinterleavedRecording, DeinterleavedTrace, PhaseAssignment, RawRecording,
};
use crate::telemetry::log::LogManager;

/// Mean of every phase-offset subsequence of `samples`.
pub fn phase_means(samples: &[f64], period: usize) -> Vec<f64> {
    (0..period)
        .map(|offset| {
            let (sum, count) = samples
                .iter()
                .skip(offset)
                .step_by(period)
                .fold((0.0, 0usize), |(sum, count), &v| (sum + v, count + 1));
            if count == 0 {
                f64::NAN
            } else {
                sum / count as f64
            }
        })
        .collect()
}

/// Assigns excitation roles to phase offsets from the reference column.
///
/// The warm-up prefix is ignored. The first phase with the largest mean gets
/// the signal role; later roles follow `config.excitation_order` modulo the period.
pub fn detect_phases(reference: &[f64], config: &StageConfig) -> StageResult<PhaseAssignment> {
    config.validate()?;
    let period = config.interleave_period;
    let trimmed = trim_warmup(reference, config.warmup_samples, period)?;

    let means = phase_means(trimmed, period);
    let brightest = means
        .iter()
        .enumerate()
        .filter(|(_, mean)| mean.is_finite())
        .fold(None, |best: Option<(usize, f64)>, (offset, &mean)| match best {
            Some((_, best_mean)) if best_mean >= mean => best,
            _ => Some((offset, mean)),
        })
        .map(|(offset, _)| offset)
        .ok_or_else(|| {
            StageError::InvalidInput("reference column has no finite phase means".into())
        })?;

    Ok(PhaseAssignment::rotate(
        &config.excitation_order,
        brightest,
        period,
    ))
}

/// Every `period`-th sample of `column`, starting at `offset`.
pub fn split(column: &[f64], offset: usize, period: usize) -> StageResult<DeinterleavedTrace> {
    if period == 0 || offset >= period {
        return Err(StageError::InvalidConfig(format!(
            "phase offset {} outside period {}",
            offset, period
        )));
    }
    Ok(DeinterleavedTrace {
        offset,
        samples: column.iter().skip(offset).step_by(period).copied().collect(),
    })
}

/// Detects the phase structure from the reference column and splits every
/// column of the recording, plus its time base, by excitation role.
pub fn demultiplex(
    recording: &RawRecording,
    config: &StageConfig,
) -> StageResult<DeinterleavedRecording> {
    let reference = recording.column(config.reference_column).ok_or_else(|| {
        StageError::InvalidConfig(format!(
            "reference column {} is not present in the recording",
            config.reference_column
        ))
    })?;
    let phases = detect_phases(reference, config)?;
    let period = config.interleave_period;

    let time = usable_window(recording.time(), config)?;
    let mut time_traces = BTreeMap::new();
    let mut traces = BTreeMap::new();

    for (role, offset) in phases.iter() {
        let role_time = split(time, offset, period)?;
        if role_time.is_empty() {
            return Err(StageError::InputTooShort {
                needed: config.warmup_samples + period,
                available: recording.len(),
            });
        }
        time_traces.insert(role, role_time);

        for (key, column) in recording.columns() {
            let window = usable_window(column, config)?;
            traces.insert((key, role), split(window, offset, period)?);
        }
    }

    Ok(DeinterleavedRecording::new(phases, time_traces, traces))
}

fn trim_warmup(samples: &[f64], warmup: usize, period: usize) -> StageResult<&[f64]> {
    let needed = warmup + period;
    if samples.len() < needed {
        return Err(StageError::InputTooShort {
            needed,
            available: samples.len(),
        });
    }
    Ok(&samples[warmup..])
}

fn usable_window<'a>(samples: &'a [f64], config: &StageConfig) -> StageResult<&'a [f64]> {
    let period = config.interleave_period;
    let trimmed = trim_warmup(samples, config.warmup_samples, period)?;
    match config.partial_cycle {
        PartialCyclePolicy::Keep => Ok(trimmed),
        PartialCyclePolicy::Drop => Ok(&trimmed[..trimmed.len() / period * period]),
    }
}

/// Demultiplexing stage.
pub struct DemuxStage {
    config: Option<StageConfig>,
    logger: LogManager,
}

impl DemuxStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new("demux"),
        }
    }
}

impl Default for DemuxStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for DemuxStage {
    type Input = RawRecording;
    type Output = DeinterleavedRecording;

    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        config.validate()?;
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(&mut self, input: RawRecording) -> StageResult<DeinterleavedRecording> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;

        let output = demultiplex(&input, config)?;
        let assignment: Vec<String> = output
            .phases
            .iter()
            .map(|(role, offset)| format!("{}={}", role, offset))
            .collect();
        self.logger.record(&format!(
            "phases [{}] from {} samples",
            assignment.join(", "),
            input.len()
        ));
        Ok(output)
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{ColumnKey, SensorChannel, Wavelength};

    fn green() -> ColumnKey {
        ColumnKey::new(1, SensorChannel::Green)
    }

    fn red() -> ColumnKey {
        ColumnKey::new(1, SensorChannel::Red)
    }

    /// Interleaves `per_phase` sequences after a warm-up block of `warmup_value`.
    fn interleave(per_phase: &[Vec<f64>], warmup: usize, warmup_value: f64) -> Vec<f64> {
        let mut column = vec![warmup_value; warmup];
        let cycles = per_phase[0].len();
        for i in 0..cycles {
            for phase in per_phase {
                if let Some(&v) = phase.get(i) {
                    column.push(v);
                }
            }
        }
        column
    }

    fn recording(columns: Vec<(ColumnKey, Vec<f64>)>) -> RawRecording {
        let len = columns[0].1.len();
        let time = (0..len).map(|i| i as f64 * 0.02).collect();
        RawRecording::new(time, columns.into_iter().collect()).unwrap()
    }

    #[test]
    fn round_trip_recovers_constant_sequences() {
        let bright = vec![1500.0; 40];
        let mid = vec![900.0; 40];
        let dim = vec![300.0; 40];
        // Brightest sequence sits at phase 1 after the warm-up.
        let column = interleave(&[dim.clone(), bright.clone(), mid.clone()], 250, 0.0);
        let rec = recording(vec![(green(), column)]);

        let output = demultiplex(&rec, &StageConfig::default()).unwrap();
        assert_eq!(output.phases.offset(Wavelength::Signal), Some(1));
        assert_eq!(output.phases.offset(Wavelength::Secondary), Some(2));
        assert_eq!(output.phases.offset(Wavelength::Isosbestic), Some(0));
        assert_eq!(output.trace(green(), Wavelength::Signal), Some(&bright[..]));
        assert_eq!(output.trace(green(), Wavelength::Secondary), Some(&mid[..]));
        assert_eq!(output.trace(green(), Wavelength::Isosbestic), Some(&dim[..]));
    }

    #[test]
    fn warmup_never_influences_phases_or_traces() {
        let per_phase = vec![vec![10.0; 30], vec![20.0; 30], vec![30.0; 30]];
        // A huge warm-up transient would otherwise dominate phase 0.
        let mut column = interleave(&per_phase, 0, 0.0);
        let mut warmup: Vec<f64> = (0..250).map(|i| if i % 3 == 0 { 1e6 } else { 0.0 }).collect();
        warmup.append(&mut column);
        let rec = recording(vec![(green(), warmup)]);

        let output = demultiplex(&rec, &StageConfig::default()).unwrap();
        assert_eq!(output.phases.offset(Wavelength::Signal), Some(2));
        for role in [Wavelength::Signal, Wavelength::Secondary, Wavelength::Isosbestic] {
            let trace = output.trace(green(), role).unwrap();
            assert!(trace.iter().all(|&v| v < 1e6));
            assert_eq!(trace.len(), 30);
        }
        let signal_time = output.time(Wavelength::Signal).unwrap();
        assert!((signal_time[0] - 252.0 * 0.02).abs() < 1e-12);
    }

    #[test]
    fn every_column_splits_at_reference_phases() {
        let green_column = interleave(&[vec![5.0; 10], vec![1.0; 10], vec![2.0; 10]], 250, 0.0);
        let red_column = interleave(&[vec![7.0; 10], vec![8.0; 10], vec![9.0; 10]], 250, 0.0);
        let rec = recording(vec![(green(), green_column), (red(), red_column)]);

        let output = demultiplex(&rec, &StageConfig::default()).unwrap();
        assert_eq!(output.phases.offset(Wavelength::Signal), Some(0));
        assert_eq!(output.trace(red(), Wavelength::Signal).unwrap()[0], 7.0);
        assert_eq!(output.trace(red(), Wavelength::Secondary).unwrap()[0], 8.0);
        assert_eq!(output.trace(red(), Wavelength::Isosbestic).unwrap()[0], 9.0);
        assert_eq!(output.columns(), vec![green(), red()]);
    }

    #[test]
    fn partial_cycle_policy_controls_trailing_samples() {
        let mut column = interleave(&[vec![3.0; 10], vec![2.0; 10], vec![1.0; 10]], 250, 0.0);
        column.push(3.0);
        let rec = recording(vec![(green(), column)]);

        let kept = demultiplex(&rec, &StageConfig::default()).unwrap();
        assert_eq!(kept.trace(green(), Wavelength::Signal).unwrap().len(), 11);
        assert_eq!(kept.trace(green(), Wavelength::Isosbestic).unwrap().len(), 10);

        let config = StageConfig {
            partial_cycle: PartialCyclePolicy::Drop,
            ..Default::default()
        };
        let dropped = demultiplex(&rec, &config).unwrap();
        assert_eq!(dropped.trace(green(), Wavelength::Signal).unwrap().len(), 10);
        assert_eq!(dropped.time(Wavelength::Signal).unwrap().len(), 10);
    }

    #[test]
    fn too_short_after_warmup_is_fatal() {
        let rec = recording(vec![(green(), vec![1.0; 252])]);
        let err = demultiplex(&rec, &StageConfig::default()).unwrap_err();
        assert_eq!(
            err,
            StageError::InputTooShort {
                needed: 253,
                available: 252
            }
        );
    }

    #[test]
    fn missing_reference_column_is_a_config_error() {
        let rec = recording(vec![(red(), vec![1.0; 300])]);
        let err = demultiplex(&rec, &StageConfig::default()).unwrap_err();
        assert!(matches!(err, StageError::InvalidConfig(_)));
    }

    #[test]
    fn ties_resolve_to_lowest_offset() {
        let config = StageConfig {
            warmup_samples: 0,
            ..Default::default()
        };
        let phases = detect_phases(&[4.0, 4.0, 1.0, 4.0, 4.0, 1.0], &config).unwrap();
        assert_eq!(phases.offset(Wavelength::Signal), Some(0));
    }

    #[test]
    fn period_two_assigns_signal_and_isosbestic() {
        let config = StageConfig {
            warmup_samples: 0,
            ..StageConfig::with_period(2)
        };
        let phases = detect_phases(&[1.0, 9.0, 1.0, 9.0], &config).unwrap();
        assert_eq!(phases.offset(Wavelength::Signal), Some(1));
        assert_eq!(phases.offset(Wavelength::Isosbestic), Some(0));
    }

    #[test]
    fn split_rejects_offset_outside_period() {
        assert!(split(&[1.0, 2.0], 3, 3).is_err());
        assert!(split(&[1.0, 2.0], 0, 0).is_err());
        let trace = split(&[0.0, 1.0, 2.0, 3.0, 4.0], 1, 3).unwrap();
        assert_eq!(trace.samples, vec![1.0, 4.0]);
    }

    #[test]
    fn stage_requires_initialization() {
        let mut stage = DemuxStage::new();
        let rec = recording(vec![(green(), vec![1.0; 300])]);
        assert!(matches!(stage.execute(rec.clone()), Err(StageError::Internal(_))));

        stage.initialize(&StageConfig::default()).unwrap();
        let output = stage.execute(rec).unwrap();
        assert_eq!(output.trace(green(), Wavelength::Signal).unwrap().len(), 17);
        stage.cleanup();
    }
}
