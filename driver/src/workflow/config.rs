use anyhow::{bail, Context};
use fphocore::prelude::StageConfig;
use fphocore::recording::{ColumnKey, SensorChannel, Wavelength};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::generator::profile::GeneratorConfig;

/// Baseline-correction models to run on every demultiplexed column.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Isosbestic,
    Bleaching,
}

/// Position of one raw column in an input row.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSpec {
    pub fiber: u8,
    pub channel: SensorChannel,
    /// Zero-based field index.
    pub index: usize,
}

impl ColumnSpec {
    pub fn key(&self) -> ColumnKey {
        ColumnKey::new(self.fiber, self.channel)
    }
}

/// How fields of an input row map onto time and raw columns.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnLayout {
    pub time_index: usize,
    pub columns: Vec<ColumnSpec>,
}

impl ColumnLayout {
    /// Acquisition export: time, frame counter, then red and green per fiber.
    pub fn for_fibers(fibers: u8) -> Self {
        let columns = (1..=fibers)
            .flat_map(|fiber| {
                let base = 2 + 2 * (fiber as usize - 1);
                [
                    ColumnSpec {
                        fiber,
                        channel: SensorChannel::Red,
                        index: base,
                    },
                    ColumnSpec {
                        fiber,
                        channel: SensorChannel::Green,
                        index: base + 1,
                    },
                ]
            })
            .collect();
        Self {
            time_index: 0,
            columns,
        }
    }

    pub fn width(&self) -> usize {
        self.columns
            .iter()
            .map(|spec| spec.index)
            .chain(std::iter::once(self.time_index))
            .max()
            .map_or(0, |max| max + 1)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.columns.is_empty() {
            bail!("column layout lists no raw columns");
        }
        let mut indices: Vec<usize> = self.columns.iter().map(|spec| spec.index).collect();
        indices.push(self.time_index);
        indices.sort_unstable();
        if indices.windows(2).any(|pair| pair[0] == pair[1]) {
            bail!("column layout maps two columns onto the same field");
        }
        let mut keys: Vec<ColumnKey> = self.columns.iter().map(ColumnSpec::key).collect();
        keys.sort_unstable();
        if keys.windows(2).any(|pair| pair[0] == pair[1]) {
            bail!("column layout lists the same fiber channel twice");
        }
        Ok(())
    }
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self::for_fibers(1)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub stage: StageConfig,
    pub layout: ColumnLayout,
    pub delimiter: char,
    pub methods: Vec<Method>,
    pub generator: GeneratorConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            stage: StageConfig::default(),
            layout: ColumnLayout::default(),
            delimiter: ' ',
            methods: vec![Method::Isosbestic, Method::Bleaching],
            generator: GeneratorConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        config
            .validate()
            .with_context(|| format!("validating workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(interleave_period: usize, warmup_samples: usize, fibers: u8) -> Self {
        Self {
            stage: StageConfig {
                warmup_samples,
                ..StageConfig::with_period(interleave_period)
            },
            layout: ColumnLayout::for_fibers(fibers),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.stage.validate()?;
        self.layout.validate()?;
        if !self.delimiter.is_ascii() {
            bail!("delimiter {:?} is not a single ASCII character", self.delimiter);
        }
        if !self
            .layout
            .columns
            .iter()
            .any(|spec| spec.key() == self.stage.reference_column)
        {
            bail!(
                "reference column {} is not part of the column layout",
                self.stage.reference_column
            );
        }
        Ok(())
    }

    pub fn runs(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }

    pub fn to_stage_config(&self) -> StageConfig {
        self.stage.clone()
    }

    /// Whether the isosbestic role exists under the configured excitation order.
    pub fn has_isosbestic(&self) -> bool {
        self.stage.excitation_order.contains(&Wavelength::Isosbestic)
    }
}
