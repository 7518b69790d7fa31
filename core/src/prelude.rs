use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::processing::bleaching::FitOptions;
use crate::recording::{ColumnKey, SensorChannel, Wavelength};

/// Default number of leading samples discarded before phase detection (about 5 s).
pub const DEFAULT_WARMUP_SAMPLES: usize = 250;

/// Default round-robin period: green, red and isosbestic excitation.
pub const DEFAULT_INTERLEAVE_PERIOD: usize = 3;

/// What to do with the trailing incomplete interleave cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartialCyclePolicy {
    /// Sub-sequences truncate naturally, so leading phases may hold one extra sample.
    #[default]
    Keep,
    /// The incomplete cycle is discarded and every role has the same length.
    Drop,
}

/// What to do when a baseline evaluates to exactly zero during residual computation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResidualPolicy {
    /// Stop with [`StageError::DegenerateControlFit`] at the first zero baseline.
    #[default]
    FailFast,
    /// Write `NaN` at the singular sample and keep going.
    PropagateNan,
}

/// Shared configuration for every processing stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageConfig {
    pub interleave_period: usize,
    pub warmup_samples: usize,
    /// Roles in rotational order, starting at the brightest phase.
    pub excitation_order: Vec<Wavelength>,
    /// Raw column whose phase means decide the phase assignment.
    pub reference_column: ColumnKey,
    pub partial_cycle: PartialCyclePolicy,
    pub residual_policy: ResidualPolicy,
    pub bleaching: FitOptions,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            interleave_period: DEFAULT_INTERLEAVE_PERIOD,
            warmup_samples: DEFAULT_WARMUP_SAMPLES,
            excitation_order: Wavelength::default_order(DEFAULT_INTERLEAVE_PERIOD),
            reference_column: ColumnKey::new(1, SensorChannel::Green),
            partial_cycle: PartialCyclePolicy::Keep,
            residual_policy: ResidualPolicy::FailFast,
            bleaching: FitOptions::default(),
        }
    }
}

impl StageConfig {
    /// Configuration for a different period, with the conventional excitation order.
    pub fn with_period(interleave_period: usize) -> Self {
        Self {
            interleave_period,
            excitation_order: Wavelength::default_order(interleave_period),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> StageResult<()> {
        if self.interleave_period == 0 {
            return Err(StageError::InvalidConfig(
                "interleave period must be positive".into(),
            ));
        }
        if self.excitation_order.len() != self.interleave_period {
            return Err(StageError::InvalidConfig(format!(
                "excitation order lists {} roles for a period of {}",
                self.excitation_order.len(),
                self.interleave_period
            )));
        }
        if self.excitation_order.first() != Some(&Wavelength::Signal) {
            return Err(StageError::InvalidConfig(
                "excitation order must start with the signal role".into(),
            ));
        }
        let distinct: BTreeSet<_> = self.excitation_order.iter().collect();
        if distinct.len() != self.excitation_order.len() {
            return Err(StageError::InvalidConfig(
                "excitation order contains duplicate roles".into(),
            ));
        }
        self.bleaching.validate()
    }
}

/// Common error type for stage execution.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("input too short: need at least {needed} samples, got {available}")]
    InputTooShort { needed: usize, available: usize },
    #[error("degenerate control fit: baseline is zero at sample {index}")]
    DegenerateControlFit { index: usize },
    #[error("reference trace has zero variance; no control fit exists")]
    FlatReference,
    #[error("bleaching fit did not converge within {evaluations} evaluations")]
    FitNonConvergence { evaluations: usize },
    #[error("bleaching fit explains too little variance (r² = {r_squared:.4})")]
    NoBleachingTrend { r_squared: f64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

impl StageError {
    /// Fit failures leave the rest of a recording usable.
    pub fn is_fit_failure(&self) -> bool {
        matches!(
            self,
            StageError::FitNonConvergence { .. } | StageError::NoBleachingTrend { .. }
        )
    }

    /// Failures confined to one column's normalization: fit failures and
    /// singular control fits.
    pub fn is_channel_failure(&self) -> bool {
        self.is_fit_failure()
            || matches!(
                self,
                StageError::DegenerateControlFit { .. } | StageError::FlatReference
            )
    }
}

pub type StageResult<T> = Result<T, StageError>;

/// Trait describing the pipeline's processing stages.
pub trait ProcessingStage {
    type Input;
    type Output;

    fn initialize(&mut self, config: &StageConfig) -> StageResult<()>;
    fn execute(&mut self, input: Self::Input) -> StageResult<Self::Output>;
    fn cleanup(&mut self);
}
