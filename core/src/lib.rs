//! Demultiplexing and baseline correction for multiplexed fiber-photometry recordings.
//!
//! A raw acquisition column round-robins samples across several excitation
//! wavelengths. [`processing::demux`] recovers the per-wavelength traces,
//! [`processing::isosbestic`] normalizes a signal trace against its isosbestic
//! reference, and [`processing::bleaching`] fits a double-exponential
//! photobleaching curve. All stages are pure with respect to their inputs.

pub mod math;
pub mod prelude;
pub mod processing;
pub mod recording;
pub mod telemetry;

pub use prelude::{ProcessingStage, StageConfig, StageError, StageResult};
