use serde::{Deserialize, Serialize};

use crate::math::stats::StatsHelper;
use crate::prelude::{StageError, StageResult};

/// First-order polynomial `y = slope·x + intercept`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    /// Ordinary least-squares line predicting `y` from `x`.
    ///
    /// Both slices must already have equal length; reconcile them first.
    pub fn least_squares(x: &[f64], y: &[f64]) -> StageResult<Self> {
        if x.len() != y.len() {
            return Err(StageError::InvalidInput(format!(
                "regression inputs differ in length ({} vs {})",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Err(StageError::InputTooShort {
                needed: 2,
                available: x.len(),
            });
        }

        let mean_x = StatsHelper::mean(x);
        let mean_y = StatsHelper::mean(y);
        let (sxx, sxy) = x
            .iter()
            .zip(y)
            .fold((0.0, 0.0), |(sxx, sxy), (&xi, &yi)| {
                let dx = xi - mean_x;
                (sxx + dx * dx, sxy + dx * (yi - mean_y))
            });

        if sxx == 0.0 || !sxx.is_finite() {
            return Err(StageError::FlatReference);
        }

        let slope = sxy / sxx;
        Ok(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}
