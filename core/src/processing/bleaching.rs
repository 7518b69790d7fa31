//! Double-exponential photobleaching model.
//!
//! Fluorescence decays as `f(t) = A·exp(B·t) + C·exp(D·t)`. The fit runs on a
//! time base rebased to zero and reports failure when the optimizer exhausts
//! its budget or when the fitted curve explains too little of the trace.

use serde::{Deserialize, Serialize};

use crate::math::optimize::{CurveModel, LevenbergMarquardt};
use crate::math::stats::StatsHelper;
use crate::prelude::{
    ProcessingStage, ResidualPolicy, StageConfig, StageError, StageResult,
};
use crate::processing::reconcile::reconcile;
use crate::processing::residual::proportional_residual;
use crate::recording::NormalizedTrace;
use crate::telemetry::log::LogManager;

/// Factor applied to the second rate when both initial rates coincide.
const RATE_SEPARATION: f64 = 10.0;

const PARAMETER_COUNT: usize = 4;

/// Coefficients of `A·exp(B·t) + C·exp(D·t)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FitParameters {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Default for FitParameters {
    /// Positive amplitudes and slow negative rates: a decaying prior.
    fn default() -> Self {
        Self {
            a: 1.0,
            b: -0.001,
            c: 1.0,
            d: -0.001,
        }
    }
}

impl FitParameters {
    pub fn evaluate(&self, t: f64) -> f64 {
        self.a * (self.b * t).exp() + self.c * (self.d * t).exp()
    }

    pub fn is_finite(&self) -> bool {
        [self.a, self.b, self.c, self.d].iter().all(|v| v.is_finite())
    }

    /// Orders the two terms so the faster decay comes first.
    pub fn canonical(self) -> Self {
        if self.d < self.b {
            Self {
                a: self.c,
                b: self.d,
                c: self.a,
                d: self.b,
            }
        } else {
            self
        }
    }

    fn to_array(self) -> [f64; 4] {
        [self.a, self.b, self.c, self.d]
    }

    fn from_slice(params: &[f64]) -> Option<Self> {
        match params {
            &[a, b, c, d] => Some(Self { a, b, c, d }),
            _ => None,
        }
    }

    /// Starting point for the optimizer. Identical rates make the two terms
    /// indistinguishable, so the second rate is moved off the first.
    fn separated(self) -> Self {
        if self.b != self.d {
            return self;
        }
        let d = if self.b == 0.0 {
            FitParameters::default().b
        } else {
            self.b * RATE_SEPARATION
        };
        Self { d, ..self }
    }
}

/// Bleaching fit settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FitOptions {
    pub initial: FitParameters,
    /// Model evaluations allowed before the fit is declared non-convergent.
    pub max_evaluations: usize,
    /// Minimum adjusted R² the fitted curve must reach.
    pub min_r_squared: f64,
    /// Largest F-test p-value, against a constant trace, accepted as a trend.
    pub significance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            initial: FitParameters::default(),
            max_evaluations: 500_000,
            min_r_squared: 0.05,
            significance: 1e-6,
        }
    }
}

impl FitOptions {
    pub fn validate(&self) -> StageResult<()> {
        if self.max_evaluations == 0 {
            return Err(StageError::InvalidConfig(
                "bleaching fit needs a positive evaluation budget".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_r_squared) {
            return Err(StageError::InvalidConfig(format!(
                "min_r_squared {} outside [0, 1]",
                self.min_r_squared
            )));
        }
        if !(self.significance > 0.0 && self.significance <= 1.0) {
            return Err(StageError::InvalidConfig(format!(
                "significance {} outside (0, 1]",
                self.significance
            )));
        }
        if !self.initial.is_finite() {
            return Err(StageError::InvalidConfig(
                "initial bleaching parameters must be finite".into(),
            ));
        }
        Ok(())
    }

    fn solver(&self) -> LevenbergMarquardt {
        LevenbergMarquardt {
            max_evaluations: self.max_evaluations,
            ..Default::default()
        }
    }
}

/// Evaluates `A·exp(B·t) + C·exp(D·t)` at every `t`.
pub fn fit_exp(t: &[f64], a: f64, b: f64, c: f64, d: f64) -> Vec<f64> {
    let params = FitParameters { a, b, c, d };
    t.iter().map(|&ti| params.evaluate(ti)).collect()
}

struct DoubleExponential;

impl CurveModel for DoubleExponential {
    fn parameter_count(&self) -> usize {
        PARAMETER_COUNT
    }

    fn value(&self, t: f64, params: &[f64]) -> f64 {
        params[0] * (params[1] * t).exp() + params[2] * (params[3] * t).exp()
    }

    fn gradient(&self, t: f64, params: &[f64], out: &mut [f64]) {
        let first = (params[1] * t).exp();
        let second = (params[3] * t).exp();
        out[0] = first;
        out[1] = params[0] * t * first;
        out[2] = second;
        out[3] = params[2] * t * second;
    }
}

/// A successful bleaching fit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BleachingFit {
    pub params: FitParameters,
    /// Fitted curve at each rebased time.
    pub curve: Vec<f64>,
    /// Time base shifted so its first sample is zero.
    pub rebased_time: Vec<f64>,
    pub r_squared: f64,
    pub adjusted_r_squared: f64,
    /// F-test p-value against the constant mean model.
    pub p_value: f64,
    pub evaluations: usize,
}

/// Fits the double-exponential bleaching model to `raw` over `time`.
pub fn fit_bleaching(raw: &[f64], time: &[f64], options: &FitOptions) -> StageResult<BleachingFit> {
    options.validate()?;
    let (raw, time) = reconcile(raw, time);
    if raw.len() <= PARAMETER_COUNT {
        return Err(StageError::InputTooShort {
            needed: PARAMETER_COUNT + 1,
            available: raw.len(),
        });
    }

    let origin = time[0];
    let rebased_time: Vec<f64> = time.iter().map(|&t| t - origin).collect();

    let solution = options.solver().minimize(
        &DoubleExponential,
        &rebased_time,
        raw,
        &options.initial.separated().to_array(),
    )?;
    let params = FitParameters::from_slice(&solution.params)
        .ok_or_else(|| StageError::Internal("optimizer returned wrong parameter count".into()))?
        .canonical();

    let curve = fit_exp(&rebased_time, params.a, params.b, params.c, params.d);
    let r_squared = StatsHelper::r_squared(raw, &curve);
    let adjusted_r_squared = StatsHelper::adjusted_r_squared(r_squared, raw.len(), PARAMETER_COUNT);
    let p_value = StatsHelper::f_test_p_value(r_squared, raw.len(), PARAMETER_COUNT);
    let acceptable = params.is_finite()
        && adjusted_r_squared >= options.min_r_squared
        && p_value <= options.significance;
    if !acceptable {
        return Err(StageError::NoBleachingTrend { r_squared });
    }

    Ok(BleachingFit {
        params,
        curve,
        rebased_time,
        r_squared,
        adjusted_r_squared,
        p_value,
        evaluations: solution.evaluations,
    })
}

/// Raw trace with its time base.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedTrace {
    pub samples: Vec<f64>,
    pub time: Vec<f64>,
}

/// Bleaching fit and the residual of the raw trace against it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BleachingNormalization {
    pub fit: BleachingFit,
    pub trace: NormalizedTrace,
}

/// Fits the bleaching curve and returns `(raw − fit) / fit` on the original time base.
pub fn normalize_bleaching(
    raw: &[f64],
    time: &[f64],
    options: &FitOptions,
    policy: ResidualPolicy,
) -> StageResult<BleachingNormalization> {
    let fit = fit_bleaching(raw, time, options)?;
    let residual = proportional_residual(raw, &fit.curve, policy)?;
    let (residual, time) = reconcile(&residual, time);
    let trace = NormalizedTrace {
        residual: residual.to_vec(),
        time: time.to_vec(),
    };
    Ok(BleachingNormalization { fit, trace })
}

/// Bleaching normalization stage.
pub struct BleachingStage {
    config: Option<StageConfig>,
    logger: LogManager,
}

impl BleachingStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new("bleaching"),
        }
    }
}

impl Default for BleachingStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for BleachingStage {
    type Input = TimedTrace;
    type Output = BleachingNormalization;

    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        config.bleaching.validate()?;
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(&mut self, input: TimedTrace) -> StageResult<BleachingNormalization> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;

        match normalize_bleaching(
            &input.samples,
            &input.time,
            &config.bleaching,
            config.residual_policy,
        ) {
            Ok(output) => {
                let p = output.fit.params;
                self.logger.record(&format!(
                    "fit A={:.4} B={:.6} C={:.4} D={:.6} r²={:.4} after {} evaluations",
                    p.a, p.b, p.c, p.d, output.fit.r_squared, output.fit.evaluations
                ));
                self.logger.detail(&format!(
                    "adjusted r²={:.4} p={:e} over {} samples",
                    output.fit.adjusted_r_squared,
                    output.fit.p_value,
                    output.fit.curve.len()
                ));
                Ok(output)
            }
            Err(err) => {
                if err.is_fit_failure() {
                    self.logger.warn(&format!("fit rejected: {}", err));
                }
                Err(err)
            }
        }
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol * b.abs().max(1.0)
    }

    #[test]
    fn fit_exp_at_time_zero_sums_amplitudes() {
        let fit = fit_exp(&[0.0, 0.0, 0.0, 0.0, 0.0], 1.0, 1.0, 1.0, 1.0);
        assert_eq!(fit, vec![2.0; 5]);
    }

    #[test]
    fn fit_exp_matches_reference_values() {
        let fit = fit_exp(&[1.0, 5.0, 8.0, 10.0], 1.0, -1.0, 1.0, -1.0);
        assert!((fit[0] - 0.7357588823428847).abs() < 1e-15);
        assert!((fit[3] - 9.079985952496971e-05).abs() < 1e-18);
        assert!((fit[1] - 2.0 * (-5.0_f64).exp()).abs() < 1e-15);
    }

    #[test]
    fn recovers_noiseless_coefficients() {
        let truth = FitParameters {
            a: 2.0,
            b: -0.5,
            c: 1.0,
            d: -0.05,
        };
        let time: Vec<f64> = (0..400).map(|i| 1000.0 + i as f64 * 0.05).collect();
        let raw: Vec<f64> = time.iter().map(|&t| truth.evaluate(t - 1000.0)).collect();

        let output =
            normalize_bleaching(&raw, &time, &FitOptions::default(), ResidualPolicy::FailFast)
                .unwrap();
        let p = output.fit.params;
        assert!(close(p.a, truth.a, 1e-6), "{:?}", p);
        assert!(close(p.b, truth.b, 1e-6), "{:?}", p);
        assert!(close(p.c, truth.c, 1e-6), "{:?}", p);
        assert!(close(p.d, truth.d, 1e-6), "{:?}", p);
        assert_eq!(output.fit.rebased_time[0], 0.0);
        assert!(output.trace.residual.iter().all(|r| r.abs() < 1e-9));
        assert_eq!(output.trace.time, time);
    }

    #[test]
    fn recovers_photometry_scale_decay() {
        let truth = FitParameters {
            a: 300.0,
            b: -0.02,
            c: 1200.0,
            d: -0.0005,
        };
        let time: Vec<f64> = (0..3000).map(|i| i as f64 * 0.06).collect();
        let raw: Vec<f64> = time.iter().map(|&t| truth.evaluate(t)).collect();

        let fit = fit_bleaching(&raw, &time, &FitOptions::default()).unwrap();
        assert!(close(fit.params.a, 300.0, 1e-6), "{:?}", fit.params);
        assert!(close(fit.params.b, -0.02, 1e-6), "{:?}", fit.params);
        assert!(close(fit.params.c, 1200.0, 1e-6), "{:?}", fit.params);
        assert!(close(fit.params.d, -0.0005, 1e-6), "{:?}", fit.params);
        assert!(fit.r_squared > 0.999_999);
    }

    #[test]
    fn noise_around_constant_is_reported_as_failure() {
        let mut rng = StdRng::seed_from_u64(7);
        let time: Vec<f64> = (0..3000).map(|i| i as f64 * 0.06).collect();
        let raw: Vec<f64> = time.iter().map(|_| 100.0 + rng.gen_range(-1.0..1.0)).collect();

        let err = fit_bleaching(&raw, &time, &FitOptions::default()).unwrap_err();
        assert!(err.is_fit_failure(), "{:?}", err);
    }

    #[test]
    fn short_noisy_traces_are_never_accepted() {
        for &len in &[12usize, 30, 60, 120] {
            for seed in 0..40u64 {
                let mut rng = StdRng::seed_from_u64(seed);
                let time: Vec<f64> = (0..len).map(|i| i as f64 * 0.06).collect();
                let raw: Vec<f64> = time.iter().map(|_| 100.0 + rng.gen_range(-1.0..1.0)).collect();

                match fit_bleaching(&raw, &time, &FitOptions::default()) {
                    Err(err) => assert!(err.is_fit_failure(), "len {} seed {}: {:?}", len, seed, err),
                    Ok(fit) => panic!(
                        "len {} seed {} accepted with r²={} p={}",
                        len, seed, fit.r_squared, fit.p_value
                    ),
                }
            }
        }
    }

    #[test]
    fn short_decaying_trace_is_accepted() {
        let truth = FitParameters {
            a: 300.0,
            b: -0.02,
            c: 1200.0,
            d: -0.0005,
        };
        let time: Vec<f64> = (0..30).map(|i| i as f64 * 6.0).collect();
        let raw: Vec<f64> = time.iter().map(|&t| truth.evaluate(t)).collect();

        let fit = fit_bleaching(&raw, &time, &FitOptions::default()).unwrap();
        assert!(fit.r_squared > 0.99);
        assert!(fit.p_value < 1e-6);
    }

    #[test]
    fn exhausted_budget_is_non_convergence() {
        let truth = FitParameters {
            a: 300.0,
            b: -0.02,
            c: 1200.0,
            d: -0.0005,
        };
        let time: Vec<f64> = (0..3000).map(|i| i as f64 * 0.06).collect();
        let raw: Vec<f64> = time.iter().map(|&t| truth.evaluate(t)).collect();
        let options = FitOptions {
            max_evaluations: 3,
            ..Default::default()
        };

        let err = fit_bleaching(&raw, &time, &options).unwrap_err();
        assert_eq!(err, StageError::FitNonConvergence { evaluations: 3 });
    }

    #[test]
    fn short_traces_are_rejected() {
        let err = fit_bleaching(&[1.0, 0.9, 0.8], &[0.0, 1.0, 2.0], &FitOptions::default())
            .unwrap_err();
        assert!(matches!(err, StageError::InputTooShort { needed: 5, available: 3 }));
        let err = fit_bleaching(&[1.0, 0.9, 0.8, 0.7], &[0.0, 1.0, 2.0, 3.0], &FitOptions::default())
            .unwrap_err();
        assert!(matches!(err, StageError::InputTooShort { needed: 5, available: 4 }));
    }

    #[test]
    fn canonical_order_puts_faster_decay_first() {
        let params = FitParameters {
            a: 1.0,
            b: -0.05,
            c: 2.0,
            d: -0.5,
        }
        .canonical();
        assert_eq!((params.a, params.b, params.c, params.d), (2.0, -0.5, 1.0, -0.05));
    }

    #[test]
    fn separated_start_breaks_rate_symmetry() {
        let start = FitParameters::default().separated();
        assert_eq!(start.b, -0.001);
        assert_eq!(start.d, -0.01);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let options = FitOptions {
            min_r_squared: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            fit_bleaching(&[1.0; 8], &[0.0; 8], &options),
            Err(StageError::InvalidConfig(_))
        ));
        let options = FitOptions {
            significance: 0.0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn stage_reports_fit_failure_without_panicking() {
        let mut stage = BleachingStage::new();
        stage.initialize(&StageConfig::default()).unwrap();
        let err = stage
            .execute(TimedTrace {
                samples: vec![5.0; 50],
                time: (0..50).map(|i| i as f64).collect(),
            })
            .unwrap_err();
        assert!(err.is_fit_failure());
        stage.cleanup();
    }
}
