use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, ConvertConfig, SourceConfig};
use crate::domain::{
    budget_bytes, exceeds_size_budget, ArtifactSummary, ConversionJob, ConversionOutcome,
    PipelineOutcome, PreflightReport,
};
use crate::onnx::CheckError;

pub const PIPELINE_TITLE: &str = "PaddleOCR -> ONNX conversion";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },
    #[error("cannot extract {}: {source}", .archive.display())]
    Extract {
        archive: PathBuf,
        source: std::io::Error,
    },
    #[error("archive {} did not produce a populated {}", .archive.display(), .expected.display())]
    ExtractionIncomplete { archive: PathBuf, expected: PathBuf },
    #[error("model file not found: {}", .0.display())]
    MissingModelFile(PathBuf),
    #[error("parameters file not found: {}", .0.display())]
    MissingParamsFile(PathBuf),
    #[error("converter error: {0}")]
    Converter(String),
    #[error("cannot decode ONNX model: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("ONNX check failed: {0}")]
    Check(#[from] CheckError),
    #[error("config error: {0}")]
    Config(String),
    #[error("{0}")]
    Message(String),
}

pub trait ArchivePorts {
    fn download(&self, url: &str, dest: &Path) -> Result<(), PipelineError>;
    fn unpack(&self, archive: &Path, dest_root: &Path) -> Result<(), PipelineError>;
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, PipelineError>;
}

/// Runs the external conversion routine. `Ok(false)` means the routine
/// finished without producing a model.
pub trait ModelConverter {
    fn convert(&self, job: &ConversionJob) -> Result<bool, PipelineError>;
}

pub trait ArtifactInspector {
    fn inspect(&self, artifact: &Path) -> Result<ArtifactSummary, PipelineError>;
}

pub trait ToolLocator {
    fn locate(&self, tool: &Path) -> Option<PathBuf>;
}

pub trait StatusReporter {
    fn report(&self, event: &PipelineEvent<'_>);
}

#[derive(Debug)]
pub enum PipelineEvent<'a> {
    Banner(&'a str),
    ToolsMissing {
        missing: &'a [String],
        hint: &'a str,
    },
    ModelDirPresent(&'a Path),
    DownloadStarted(&'a str),
    DownloadFinished(&'a Path),
    ExtractStarted(&'a Path),
    ExtractFinished(&'a Path),
    ConvertStarted {
        model_file: &'a Path,
        output_file: &'a Path,
    },
    Converted {
        output_file: &'a Path,
        size_bytes: u64,
    },
    SizeBudgetExceeded {
        size_bytes: u64,
        budget_bytes: u64,
        next_step: &'a str,
    },
    ConvertFailed(&'a str),
    VerifyStarted(&'a Path),
    Verified(&'a ArtifactSummary),
    VerifyFailed(&'a str),
    Fatal(&'a PipelineError),
    Finished {
        outcome: PipelineOutcome,
        next_step: &'a str,
    },
}

pub struct Ports<'a> {
    pub archive: &'a dyn ArchivePorts,
    pub converter: &'a dyn ModelConverter,
    pub inspector: &'a dyn ArtifactInspector,
}

pub fn preflight(locator: &dyn ToolLocator, tools: &[PathBuf]) -> PreflightReport {
    let mut report = PreflightReport::default();

    for tool in tools {
        let name = tool.display().to_string();
        match locator.locate(tool) {
            Some(path) => {
                tracing::debug!(tool = %name, path = %path.display(), "found tool");
                report.found.push((name, path));
            }
            None => report.missing.push(name),
        }
    }

    report
}

/// Ensures the model directory exists under `work_dir`, downloading and
/// unpacking the archive only when it is absent.
pub fn fetch_model(
    ports: &dyn ArchivePorts,
    reporter: &dyn StatusReporter,
    source: &SourceConfig,
    work_dir: &Path,
) -> Result<PathBuf, PipelineError> {
    let model_dir = work_dir.join(&source.model_dir);

    if model_dir.exists() {
        reporter.report(&PipelineEvent::ModelDirPresent(&model_dir));
        return Ok(model_dir);
    }

    let archive = work_dir.join(&source.archive_name);

    reporter.report(&PipelineEvent::DownloadStarted(&source.url));
    ports.download(&source.url, &archive)?;
    reporter.report(&PipelineEvent::DownloadFinished(&archive));

    reporter.report(&PipelineEvent::ExtractStarted(&archive));
    ports.unpack(&archive, work_dir)?;

    let populated = model_dir.is_dir() && !ports.list_files(&model_dir)?.is_empty();
    if !populated {
        // the archive stays on disk for inspection
        return Err(PipelineError::ExtractionIncomplete {
            archive,
            expected: model_dir,
        });
    }

    fs::remove_file(&archive)?;
    reporter.report(&PipelineEvent::ExtractFinished(&model_dir));

    Ok(model_dir)
}

/// Missing input files are fatal errors; anything that goes wrong inside the
/// converter itself comes back as [`ConversionOutcome::Failed`].
pub fn convert_model(
    converter: &dyn ModelConverter,
    reporter: &dyn StatusReporter,
    convert: &ConvertConfig,
    model_dir: &Path,
    work_dir: &Path,
) -> Result<ConversionOutcome, PipelineError> {
    let model_file = model_dir.join(&convert.model_filename);
    let params_file = model_dir.join(&convert.params_filename);

    if !model_file.exists() {
        return Err(PipelineError::MissingModelFile(model_file));
    }
    if !params_file.exists() {
        return Err(PipelineError::MissingParamsFile(params_file));
    }

    let job = ConversionJob {
        model_file,
        params_file,
        output_file: work_dir.join(&convert.output_file),
        opset_version: convert.opset_version,
        enable_checker: convert.enable_onnx_checker,
    };

    reporter.report(&PipelineEvent::ConvertStarted {
        model_file: &job.model_file,
        output_file: &job.output_file,
    });

    let outcome = match remove_stale_output(&job.output_file) {
        Err(reason) => ConversionOutcome::Failed { reason },
        Ok(()) => run_converter(converter, &job),
    };

    match &outcome {
        ConversionOutcome::Produced { size_bytes } => {
            reporter.report(&PipelineEvent::Converted {
                output_file: &job.output_file,
                size_bytes: *size_bytes,
            });

            let budget = budget_bytes(convert.size_budget_mb);
            if exceeds_size_budget(*size_bytes, budget) {
                reporter.report(&PipelineEvent::SizeBudgetExceeded {
                    size_bytes: *size_bytes,
                    budget_bytes: budget,
                    next_step: &convert.next_step,
                });
            }
        }
        ConversionOutcome::Failed { reason } => {
            tracing::warn!(%reason, "conversion failed");
            reporter.report(&PipelineEvent::ConvertFailed(reason));
        }
    }

    Ok(outcome)
}

/// A leftover artifact from an earlier run must not pass for fresh output.
fn remove_stale_output(output_file: &Path) -> Result<(), String> {
    match fs::remove_file(output_file) {
        Ok(()) => {
            tracing::debug!(path = %output_file.display(), "removed stale output");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(format!(
            "cannot remove stale {}: {err}",
            output_file.display()
        )),
    }
}

fn run_converter(converter: &dyn ModelConverter, job: &ConversionJob) -> ConversionOutcome {
    match converter.convert(job) {
        Ok(true) => match fs::metadata(&job.output_file) {
            Ok(metadata) => ConversionOutcome::Produced {
                size_bytes: metadata.len(),
            },
            Err(err) => ConversionOutcome::Failed {
                reason: format!("cannot read {}: {err}", job.output_file.display()),
            },
        },
        Ok(false) => ConversionOutcome::Failed {
            reason: "converter did not produce a model".to_string(),
        },
        Err(err) => ConversionOutcome::Failed {
            reason: err.to_string(),
        },
    }
}

/// Best effort: a failed check is reported and returned as `false`.
pub fn verify_artifact(
    inspector: &dyn ArtifactInspector,
    reporter: &dyn StatusReporter,
    artifact: &Path,
) -> bool {
    reporter.report(&PipelineEvent::VerifyStarted(artifact));

    match inspector.inspect(artifact) {
        Ok(summary) => {
            reporter.report(&PipelineEvent::Verified(&summary));
            true
        }
        Err(err) => {
            tracing::warn!(error = %err, "verification failed");
            reporter.report(&PipelineEvent::VerifyFailed(&err.to_string()));
            false
        }
    }
}

pub fn run_pipeline(
    ports: &Ports<'_>,
    reporter: &dyn StatusReporter,
    config: &Config,
    work_dir: &Path,
) -> Result<PipelineOutcome, PipelineError> {
    reporter.report(&PipelineEvent::Banner(PIPELINE_TITLE));

    let result = run_stages(ports, reporter, config, work_dir);

    match &result {
        Ok(outcome) => reporter.report(&PipelineEvent::Finished {
            outcome: *outcome,
            next_step: &config.convert.next_step,
        }),
        Err(err) => reporter.report(&PipelineEvent::Fatal(err)),
    }

    result
}

fn run_stages(
    ports: &Ports<'_>,
    reporter: &dyn StatusReporter,
    config: &Config,
    work_dir: &Path,
) -> Result<PipelineOutcome, PipelineError> {
    let model_dir = fetch_model(ports.archive, reporter, &config.source, work_dir)?;

    let outcome = convert_model(
        ports.converter,
        reporter,
        &config.convert,
        &model_dir,
        work_dir,
    )?;
    if !outcome.is_produced() {
        return Ok(PipelineOutcome::default());
    }

    let artifact = work_dir.join(&config.convert.output_file);
    let verified = verify_artifact(ports.inspector, reporter, &artifact);

    Ok(PipelineOutcome {
        produced: true,
        verified,
    })
}
