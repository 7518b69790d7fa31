use crate::ingest::reader::read_recording;
use crate::workflow::config::{Method, WorkflowConfig};
use anyhow::Context;
use fphocore::prelude::{ProcessingStage, StageError};
use fphocore::processing::{
    BleachingNormalization, BleachingStage, DemuxStage, IsosbesticInput, IsosbesticNormalization,
    IsosbesticStage, TimedTrace,
};
use fphocore::recording::{ColumnKey, PhaseAssignment, RawRecording, Wavelength};
use fphocore::telemetry::MetricsRecorder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Builder as TokioBuilder;

/// Result of one normalization method on one column.
#[derive(Debug, Clone)]
pub enum FitOutcome<T> {
    Fitted(T),
    Failed(StageError),
}

impl<T> FitOutcome<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, FitOutcome::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct ChannelResult {
    pub column: ColumnKey,
    pub emission: Wavelength,
    pub isosbestic: Option<FitOutcome<IsosbesticNormalization>>,
    pub bleaching: Option<FitOutcome<BleachingNormalization>>,
}

impl ChannelResult {
    pub fn failed_fits(&self) -> usize {
        self.isosbestic.iter().filter(|o| o.is_failed()).count()
            + self.bleaching.iter().filter(|o| o.is_failed()).count()
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub phases: PhaseAssignment,
    pub raw_samples: usize,
    pub channels: Vec<ChannelResult>,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
    metrics: Arc<MetricsRecorder>,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn execute(&self, recording: RawRecording) -> anyhow::Result<WorkflowResult> {
        let stage_config = self.config.to_stage_config();
        let raw_samples = recording.len();

        let mut demux_stage = DemuxStage::new();
        demux_stage
            .initialize(&stage_config)
            .context("initializing demux stage")?;
        let deinterleaved = demux_stage
            .execute(recording)
            .context("executing demux stage")?;
        demux_stage.cleanup();

        let run_isosbestic = self.config.runs(Method::Isosbestic) && self.config.has_isosbestic();
        let run_bleaching = self.config.runs(Method::Bleaching);

        let mut isosbestic_stage = IsosbesticStage::new();
        isosbestic_stage
            .initialize(&stage_config)
            .context("initializing isosbestic stage")?;
        let mut bleaching_stage = BleachingStage::new();
        bleaching_stage
            .initialize(&stage_config)
            .context("initializing bleaching stage")?;

        let mut channels = Vec::new();
        for column in deinterleaved.columns() {
            let emission = column.channel.emission_role();
            let (signal, time) = match (
                deinterleaved.trace(column, emission),
                deinterleaved.time(emission),
            ) {
                (Some(signal), Some(time)) => (signal, time),
                _ => {
                    log::debug!("{} has no {} phase, skipping", column, emission);
                    continue;
                }
            };

            let isosbestic = if run_isosbestic {
                deinterleaved
                    .trace(column, Wavelength::Isosbestic)
                    .map(|reference| {
                        outcome(isosbestic_stage.execute(IsosbesticInput {
                            signal: signal.to_vec(),
                            reference: reference.to_vec(),
                            time: time.to_vec(),
                        }))
                    })
                    .transpose()
                    .with_context(|| format!("normalizing {} against isosbestic", column))?
            } else {
                None
            };

            let bleaching = if run_bleaching {
                let fitted = outcome(bleaching_stage.execute(TimedTrace {
                    samples: signal.to_vec(),
                    time: time.to_vec(),
                }))
                .with_context(|| format!("fitting bleaching curve of {}", column))?;
                Some(fitted)
            } else {
                None
            };

            let channel = ChannelResult {
                column,
                emission,
                isosbestic,
                bleaching,
            };
            for _ in 0..channel.failed_fits() {
                self.metrics.record_failed_fit();
            }
            channels.push(channel);
        }

        isosbestic_stage.cleanup();
        bleaching_stage.cleanup();

        Ok(WorkflowResult {
            phases: deinterleaved.phases,
            raw_samples,
            channels,
        })
    }

    pub fn execute_file(&self, path: &Path) -> anyhow::Result<WorkflowResult> {
        let recording = read_recording(path, &self.config.layout, self.config.delimiter)?;
        self.execute(recording)
            .with_context(|| format!("processing {}", path.display()))
    }

    /// Processes every file on a blocking worker and returns results in input order.
    pub fn execute_batch(
        &self,
        inputs: Vec<PathBuf>,
    ) -> anyhow::Result<Vec<(PathBuf, anyhow::Result<WorkflowResult>)>> {
        let runtime = TokioBuilder::new_multi_thread()
            .enable_all()
            .build()
            .context("creating batch runtime")?;

        runtime.block_on(async {
            let handles: Vec<_> = inputs
                .into_iter()
                .map(|path| {
                    let runner = self.clone();
                    tokio::task::spawn_blocking(move || {
                        let result = runner.execute_file(&path);
                        match &result {
                            Ok(_) => runner.metrics.record_processed(),
                            Err(err) => {
                                log::error!("{:#}", err);
                                runner.metrics.record_error();
                            }
                        }
                        (path, result)
                    })
                })
                .collect();

            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                results.push(handle.await.context("joining file worker")?);
            }
            Ok::<_, anyhow::Error>(results)
        })
    }
}

/// Channel failures become part of the result; anything else stays fatal for the file.
fn outcome<T>(result: Result<T, StageError>) -> Result<FitOutcome<T>, StageError> {
    match result {
        Ok(value) => Ok(FitOutcome::Fitted(value)),
        Err(err) if err.is_channel_failure() => Ok(FitOutcome::Failed(err)),
        Err(err) => Err(err),
    }
}
