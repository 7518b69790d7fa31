pub mod bleaching;
pub mod demux;
pub mod isosbestic;
pub mod reconcile;
pub mod residual;

pub use bleaching::{
    fit_bleaching, fit_exp, normalize_bleaching, BleachingFit, BleachingNormalization,
    BleachingStage, FitOptions, FitParameters, TimedTrace,
};
pub use demux::{demultiplex, detect_phases, split, DemuxStage};
pub use isosbestic::{normalize_isosbestic, IsosbesticInput, IsosbesticNormalization, IsosbesticStage};
pub use reconcile::reconcile;
pub use residual::proportional_residual;
