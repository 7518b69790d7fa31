pub mod channel;
pub mod trace;

pub use channel::{ColumnKey, PhaseAssignment, SensorChannel, Wavelength};
pub use trace::{DeinterleavedRecording, DeinterleavedTrace, NormalizedTrace, RawRecording};
