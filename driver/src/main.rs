use anyhow::{bail, Context};
use clap::Parser;
use fphocore::prelude::{DEFAULT_INTERLEAVE_PERIOD, DEFAULT_WARMUP_SAMPLES};
use fphocore::recording::Wavelength;
use generator::profile::build_recording;
use report::FileReport;
use std::path::PathBuf;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod ingest;
mod report;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Fiber-photometry demultiplexing and normalization driver")]
struct Args {
    /// Recordings to process, one headerless delimited file each
    inputs: Vec<PathBuf>,
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Number of interleaved excitation phases
    #[arg(long)]
    period: Option<usize>,
    /// Leading samples discarded before phase detection
    #[arg(long)]
    warmup: Option<usize>,
    /// Fibers in the default column layout
    #[arg(long, default_value_t = 1)]
    fibers: u8,
    /// Field delimiter of the input files
    #[arg(long)]
    delimiter: Option<char>,
    /// Generate and process a synthetic recording
    #[arg(long, default_value_t = false)]
    synthetic: bool,
    /// Seed for the synthetic generator
    #[arg(long)]
    seed: Option<u64>,
    /// Append one JSON line per processed file
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Args {
    fn workflow_config(&self) -> anyhow::Result<WorkflowConfig> {
        let mut config = match &self.workflow {
            Some(path) => WorkflowConfig::load(path)?,
            None => WorkflowConfig::from_args(
                self.period.unwrap_or(DEFAULT_INTERLEAVE_PERIOD),
                self.warmup.unwrap_or(DEFAULT_WARMUP_SAMPLES),
                self.fibers,
            ),
        };
        if self.workflow.is_some() {
            if let Some(period) = self.period {
                config.stage.interleave_period = period;
                config.stage.excitation_order = Wavelength::default_order(period);
            }
            if let Some(warmup) = self.warmup {
                config.stage.warmup_samples = warmup;
            }
        }
        if let Some(delimiter) = self.delimiter {
            config.delimiter = delimiter;
        }
        if let Some(seed) = self.seed {
            config.generator.seed = seed;
        }
        config.generator.interleave_period = config.stage.interleave_period;
        config.validate().context("validating command-line overrides")?;
        Ok(config)
    }
}

fn emit(report: &FileReport, sink: Option<&PathBuf>) -> anyhow::Result<()> {
    println!("{}", report.summary_line());
    if let Some(path) = sink {
        report.append_to(path)?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.inputs.is_empty() && !args.synthetic {
        bail!("no input recordings given (pass files or --synthetic)");
    }

    let workflow_config = args.workflow_config()?;
    let runner = Runner::new(workflow_config.clone());

    if args.synthetic {
        let synthetic = build_recording(&workflow_config.generator)?;
        log::info!(
            "synthetic recording with signal on raw phase {}",
            synthetic.signal_phase
        );
        let result = runner
            .execute(synthetic.recording)
            .context("processing synthetic recording")?;
        emit(
            &FileReport::from_result("<synthetic>", &result),
            args.report.as_ref(),
        )?;
    }

    if !args.inputs.is_empty() {
        for (path, result) in runner.execute_batch(args.inputs.clone())? {
            match result {
                Ok(result) => {
                    let source = path.display().to_string();
                    emit(&FileReport::from_result(&source, &result), args.report.as_ref())?;
                }
                Err(err) => eprintln!("{}: skipped: {:#}", path.display(), err),
            }
        }

        let metrics = runner.metrics().snapshot();
        log::info!(
            "batch done: {} processed, {} skipped, {} failed fits",
            metrics.processed,
            metrics.errors,
            metrics.failed_fits
        );
    }

    Ok(())
}
