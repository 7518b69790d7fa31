use serde::{Deserialize, Serialize};

use crate::math::regression::LinearFit;
use crate::prelude::{
    ProcessingStage, ResidualPolicy, StageConfig, StageError, StageResult,
};
use crate::processing::reconcile::reconcile;
use crate::processing::residual::proportional_residual;
use crate::recording::NormalizedTrace;
use crate::telemetry::log::LogManager;

/// Signal and isosbestic traces of one column, with the signal's time base.
#[derive(Debug, Clone, PartialEq)]
pub struct IsosbesticInput {
    pub signal: Vec<f64>,
    pub reference: Vec<f64>,
    pub time: Vec<f64>,
}

/// Control fit of signal against reference and the residual it leaves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IsosbesticNormalization {
    pub fit: LinearFit,
    pub trace: NormalizedTrace,
}

/// Normalizes `signal` against the isosbestic `reference`.
///
/// Fits `signal ≈ a·reference + b` by least squares and returns
/// `(signal − control) / control` for the control fit at each reference
/// sample, paired with the matching prefix of `time`.
pub fn normalize_isosbestic(
    signal: &[f64],
    reference: &[f64],
    time: &[f64],
    policy: ResidualPolicy,
) -> StageResult<IsosbesticNormalization> {
    let (signal, reference) = reconcile(signal, reference);
    let fit = LinearFit::least_squares(reference, signal)?;
    let control: Vec<f64> = reference.iter().map(|&r| fit.evaluate(r)).collect();
    let residual = proportional_residual(signal, &control, policy)?;
    let (residual, time) = reconcile(&residual, time);

    Ok(IsosbesticNormalization {
        fit,
        trace: NormalizedTrace {
            residual: residual.to_vec(),
            time: time.to_vec(),
        },
    })
}

/// Isosbestic normalization stage.
pub struct IsosbesticStage {
    config: Option<StageConfig>,
    logger: LogManager,
}

impl IsosbesticStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new("isosbestic"),
        }
    }
}

impl Default for IsosbesticStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for IsosbesticStage {
    type Input = IsosbesticInput;
    type Output = IsosbesticNormalization;

    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(&mut self, input: IsosbesticInput) -> StageResult<IsosbesticNormalization> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;

        let output = normalize_isosbestic(
            &input.signal,
            &input.reference,
            &input.time,
            config.residual_policy,
        )?;
        self.logger.record(&format!(
            "control fit slope {:.4} intercept {:.4} over {} samples",
            output.fit.slope,
            output.fit.intercept,
            output.trace.len()
        ));
        Ok(output)
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}
