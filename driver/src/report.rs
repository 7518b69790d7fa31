use anyhow::Context;
use fphocore::recording::Wavelength;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::workflow::runner::{ChannelResult, FitOutcome, WorkflowResult};

pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PhaseEntry {
    pub role: Wavelength,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MethodReport {
    Linear {
        slope: f64,
        intercept: f64,
        samples: usize,
    },
    DoubleExponential {
        a: f64,
        b: f64,
        c: f64,
        d: f64,
        r_squared: f64,
        p_value: f64,
        evaluations: usize,
        samples: usize,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChannelReport {
    pub column: String,
    pub emission: Wavelength,
    pub isosbestic: Option<MethodReport>,
    pub bleaching: Option<MethodReport>,
}

/// Per-file summary written as one JSON line.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileReport {
    pub source: String,
    pub driver_version: &'static str,
    pub period: usize,
    pub raw_samples: usize,
    pub phases: Vec<PhaseEntry>,
    pub channels: Vec<ChannelReport>,
}

impl FileReport {
    pub fn from_result(source: &str, result: &WorkflowResult) -> Self {
        Self {
            source: source.to_string(),
            driver_version: DRIVER_VERSION,
            period: result.phases.period,
            raw_samples: result.raw_samples,
            phases: result
                .phases
                .iter()
                .map(|(role, offset)| PhaseEntry { role, offset })
                .collect(),
            channels: result.channels.iter().map(channel_report).collect(),
        }
    }

    pub fn failed_fits(&self) -> usize {
        self.channels
            .iter()
            .flat_map(|c| c.isosbestic.iter().chain(c.bleaching.iter()))
            .filter(|m| matches!(m, MethodReport::Failed { .. }))
            .count()
    }

    pub fn summary_line(&self) -> String {
        let phases: Vec<String> = self
            .phases
            .iter()
            .map(|entry| format!("{}@{}", entry.role, entry.offset))
            .collect();
        format!(
            "{}: {} samples, phases [{}], {} channels, {} failed fits",
            self.source,
            self.raw_samples,
            phases.join(" "),
            self.channels.len(),
            self.failed_fits()
        )
    }

    pub fn append_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating report directory {}", parent.display()))?;
        }
        let line = serde_json::to_string(self).context("serializing file report")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening report {}", path.display()))?;
        writeln!(file, "{}", line).with_context(|| format!("writing report {}", path.display()))?;
        Ok(())
    }
}

fn channel_report(channel: &ChannelResult) -> ChannelReport {
    ChannelReport {
        column: channel.column.to_string(),
        emission: channel.emission,
        isosbestic: channel.isosbestic.as_ref().map(|outcome| match outcome {
            FitOutcome::Fitted(output) => MethodReport::Linear {
                slope: output.fit.slope,
                intercept: output.fit.intercept,
                samples: output.trace.len(),
            },
            FitOutcome::Failed(err) => MethodReport::Failed {
                reason: err.to_string(),
            },
        }),
        bleaching: channel.bleaching.as_ref().map(|outcome| match outcome {
            FitOutcome::Fitted(output) => {
                let p = output.fit.params;
                MethodReport::DoubleExponential {
                    a: p.a,
                    b: p.b,
                    c: p.c,
                    d: p.d,
                    r_squared: output.fit.r_squared,
                    p_value: output.fit.p_value,
                    evaluations: output.fit.evaluations,
                    samples: output.trace.len(),
                }
            }
            FitOutcome::Failed(err) => MethodReport::Failed {
                reason: err.to_string(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fphocore::math::LinearFit;
    use fphocore::prelude::StageError;
    use fphocore::processing::IsosbesticNormalization;
    use fphocore::recording::{ColumnKey, NormalizedTrace, PhaseAssignment, SensorChannel};
    use tempfile::tempdir;

    fn sample_result() -> WorkflowResult {
        WorkflowResult {
            phases: PhaseAssignment::rotate(&Wavelength::default_order(3), 1, 3),
            raw_samples: 1000,
            channels: vec![ChannelResult {
                column: ColumnKey::new(1, SensorChannel::Green),
                emission: Wavelength::Signal,
                isosbestic: Some(FitOutcome::Fitted(IsosbesticNormalization {
                    fit: LinearFit {
                        slope: 1.5,
                        intercept: 20.0,
                    },
                    trace: NormalizedTrace {
                        residual: vec![0.0; 250],
                        time: vec![0.0; 250],
                    },
                })),
                bleaching: Some(FitOutcome::Failed(StageError::NoBleachingTrend {
                    r_squared: 0.01,
                })),
            }],
        }
    }

    #[test]
    fn report_summarizes_result() {
        let report = FileReport::from_result("session.txt", &sample_result());
        assert_eq!(report.period, 3);
        assert_eq!(report.phases[0].role, Wavelength::Signal);
        assert_eq!(report.phases[0].offset, 1);
        assert_eq!(report.channels[0].column, "f1Green");
        assert_eq!(report.failed_fits(), 1);
        let line = report.summary_line();
        assert!(line.starts_with("session.txt: 1000 samples"));
        assert!(line.contains("Signal@1"));
        assert!(line.ends_with("1 failed fits"));
    }

    #[test]
    fn report_appends_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("batch.jsonl");
        let report = FileReport::from_result("session.txt", &sample_result());
        report.append_to(&path).unwrap();
        report.append_to(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["driver_version"], DRIVER_VERSION);
        assert_eq!(value["channels"][0]["isosbestic"]["status"], "linear");
        assert_eq!(value["channels"][0]["isosbestic"]["slope"], 1.5);
        assert_eq!(value["channels"][0]["bleaching"]["status"], "failed");
    }
}
