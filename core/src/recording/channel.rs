use serde::{Deserialize, Serialize};
use std::fmt;

/// Excitation role of one phase of the round-robin cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Wavelength {
    /// Brightest excitation (470 nm, GCaMP).
    Signal,
    /// Second fluorophore (560 nm).
    Secondary,
    /// Isosbestic reference (415 nm).
    Isosbestic,
    /// Extra phases for periods above three.
    Auxiliary(usize),
}

impl Wavelength {
    /// Conventional rotational order for a given period: signal, secondary, isosbestic,
    /// then auxiliary slots. A period of two carries only signal and isosbestic.
    pub fn default_order(period: usize) -> Vec<Wavelength> {
        match period {
            0 => Vec::new(),
            1 => vec![Wavelength::Signal],
            2 => vec![Wavelength::Signal, Wavelength::Isosbestic],
            _ => {
                let mut order = vec![
                    Wavelength::Signal,
                    Wavelength::Secondary,
                    Wavelength::Isosbestic,
                ];
                order.extend((0..period - 3).map(Wavelength::Auxiliary));
                order
            }
        }
    }
}

impl fmt::Display for Wavelength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wavelength::Signal => write!(f, "Signal"),
            Wavelength::Secondary => write!(f, "Secondary"),
            Wavelength::Isosbestic => write!(f, "Iso"),
            Wavelength::Auxiliary(slot) => write!(f, "Aux{}", slot),
        }
    }
}

/// Camera channel a raw column was recorded on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SensorChannel {
    Green,
    Red,
}

impl SensorChannel {
    /// Excitation whose emission this channel is built to capture.
    pub fn emission_role(self) -> Wavelength {
        match self {
            SensorChannel::Green => Wavelength::Signal,
            SensorChannel::Red => Wavelength::Secondary,
        }
    }
}

/// Identifies one physical acquisition column: a fiber and a camera channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnKey {
    pub fiber: u8,
    pub channel: SensorChannel,
}

impl ColumnKey {
    pub fn new(fiber: u8, channel: SensorChannel) -> Self {
        Self { fiber, channel }
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}{:?}", self.fiber, self.channel)
    }
}

/// Phase offset of every excitation role within one interleave period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseAssignment {
    pub period: usize,
    offsets: Vec<(Wavelength, usize)>,
}

impl PhaseAssignment {
    /// Rotates `order` so that its first role lands on `brightest`.
    pub fn rotate(order: &[Wavelength], brightest: usize, period: usize) -> Self {
        let offsets = order
            .iter()
            .enumerate()
            .map(|(step, &role)| (role, (brightest + step) % period))
            .collect();
        Self { period, offsets }
    }

    pub fn offset(&self, role: Wavelength) -> Option<usize> {
        self.offsets
            .iter()
            .find(|(candidate, _)| *candidate == role)
            .map(|&(_, offset)| offset)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Wavelength, usize)> + '_ {
        self.offsets.iter().copied()
    }
}
