use statrs::distribution::{ContinuousCDF, FisherSnedecor};

pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    /// R² penalized for `parameters` free coefficients over `samples` points.
    ///
    /// Needs `samples > parameters`; otherwise returns `NaN`.
    pub fn adjusted_r_squared(r_squared: f64, samples: usize, parameters: usize) -> f64 {
        if samples <= parameters {
            return f64::NAN;
        }
        let n = samples as f64;
        1.0 - (1.0 - r_squared) * (n - 1.0) / (n - parameters as f64)
    }

    /// p-value of the F-test comparing a `parameters`-coefficient fit with the
    /// constant mean model, given the fit's R².
    ///
    /// Returns `NaN` when there are no residual degrees of freedom.
    pub fn f_test_p_value(r_squared: f64, samples: usize, parameters: usize) -> f64 {
        if parameters < 2 || samples <= parameters || !r_squared.is_finite() {
            return f64::NAN;
        }
        let model_df = (parameters - 1) as f64;
        let residual_df = (samples - parameters) as f64;
        if r_squared <= 0.0 {
            return 1.0;
        }
        if r_squared >= 1.0 {
            return 0.0;
        }
        let statistic = (r_squared / model_df) / ((1.0 - r_squared) / residual_df);
        match FisherSnedecor::new(model_df, residual_df) {
            Ok(dist) => (1.0 - dist.cdf(statistic)).max(0.0),
            Err(_) => f64::NAN,
        }
    }

    /// Coefficient of determination of `fitted` against `observed`.
    ///
    /// A constant `observed` has no variance to explain and yields zero.
    pub fn r_squared(observed: &[f64], fitted: &[f64]) -> f64 {
        let len = observed.len().min(fitted.len());
        if len == 0 {
            return 0.0;
        }
        let observed = &observed[..len];
        let mean = Self::mean(observed);
        let total: f64 = observed.iter().map(|&v| (v - mean) * (v - mean)).sum();
        if total == 0.0 {
            return 0.0;
        }
        let residual: f64 = observed
            .iter()
            .zip(&fitted[..len])
            .map(|(&o, &f)| (o - f) * (o - f))
            .sum();
        1.0 - residual / total
    }
}
