use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::prelude::{StageError, StageResult};
use crate::recording::channel::{ColumnKey, PhaseAssignment, Wavelength};

/// One file's worth of raw acquisition columns sharing a time base.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecording {
    time: Vec<f64>,
    columns: BTreeMap<ColumnKey, Vec<f64>>,
}

impl RawRecording {
    pub fn new(time: Vec<f64>, columns: BTreeMap<ColumnKey, Vec<f64>>) -> StageResult<Self> {
        for (key, column) in &columns {
            if column.len() != time.len() {
                return Err(StageError::InvalidInput(format!(
                    "column {} has {} samples but the time column has {}",
                    key,
                    column.len(),
                    time.len()
                )));
            }
        }
        Ok(Self { time, columns })
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn column(&self, key: ColumnKey) -> Option<&[f64]> {
        self.columns.get(&key).map(Vec::as_slice)
    }

    pub fn columns(&self) -> impl Iterator<Item = (ColumnKey, &[f64])> + '_ {
        self.columns.iter().map(|(key, column)| (*key, column.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Every P-th sample of a raw column, starting at a phase offset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeinterleavedTrace {
    pub offset: usize,
    pub samples: Vec<f64>,
}

impl DeinterleavedTrace {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Demultiplexer output: per-role time bases and per-role traces of every raw column.
#[derive(Debug, Clone, PartialEq)]
pub struct DeinterleavedRecording {
    pub phases: PhaseAssignment,
    time: BTreeMap<Wavelength, DeinterleavedTrace>,
    traces: BTreeMap<(ColumnKey, Wavelength), DeinterleavedTrace>,
}

impl DeinterleavedRecording {
    pub(crate) fn new(
        phases: PhaseAssignment,
        time: BTreeMap<Wavelength, DeinterleavedTrace>,
        traces: BTreeMap<(ColumnKey, Wavelength), DeinterleavedTrace>,
    ) -> Self {
        Self {
            phases,
            time,
            traces,
        }
    }

    pub fn time(&self, role: Wavelength) -> Option<&[f64]> {
        self.time.get(&role).map(|trace| trace.samples.as_slice())
    }

    pub fn trace(&self, column: ColumnKey, role: Wavelength) -> Option<&[f64]> {
        self.traces
            .get(&(column, role))
            .map(|trace| trace.samples.as_slice())
    }

    /// Distinct raw columns present in the recording.
    pub fn columns(&self) -> Vec<ColumnKey> {
        let mut columns: Vec<ColumnKey> = self.traces.keys().map(|(column, _)| *column).collect();
        columns.dedup();
        columns
    }
}

/// Proportional residual against a baseline, paired with its trimmed time base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NormalizedTrace {
    pub residual: Vec<f64>,
    pub time: Vec<f64>,
}

impl NormalizedTrace {
    pub fn len(&self) -> usize {
        self.residual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residual.is_empty()
    }
}
