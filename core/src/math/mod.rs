pub mod matrix;
pub mod optimize;
pub mod regression;
pub mod stats;

pub use matrix::MatrixHelper;
pub use optimize::{CurveModel, LevenbergMarquardt, Solution};
pub use regression::LinearFit;
pub use stats::StatsHelper;
