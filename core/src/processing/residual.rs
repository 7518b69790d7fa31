use crate::prelude::{ResidualPolicy, StageError, StageResult};
use crate::processing::reconcile::reconcile;

/// `(observed − baseline) / baseline` per sample, after reconciling lengths.
pub fn proportional_residual(
    observed: &[f64],
    baseline: &[f64],
    policy: ResidualPolicy,
) -> StageResult<Vec<f64>> {
    let (observed, baseline) = reconcile(observed, baseline);
    observed
        .iter()
        .zip(baseline)
        .enumerate()
        .map(|(index, (&o, &b))| {
            if b == 0.0 {
                match policy {
                    ResidualPolicy::FailFast => Err(StageError::DegenerateControlFit { index }),
                    ResidualPolicy::PropagateNan => Ok(f64::NAN),
                }
            } else {
                Ok((o - b) / b)
            }
        })
        .collect()
}
