use std::ffi::OsStr;
use std::fs;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use console::{style, Term};
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use prost::Message;
use walkdir::WalkDir;

use crate::application::{
    ArchivePorts, ArtifactInspector, ModelConverter, PipelineError, PipelineEvent,
    StatusReporter, ToolLocator,
};
use crate::domain::{size_mb, ArtifactSummary, ConversionJob, TensorSummary};
use crate::onnx::{check_model, summarize, ModelProto};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const RULE_WIDTH: usize = 60;

pub struct HttpArchivePorts {
    client: reqwest::blocking::Client,
    show_progress: bool,
}

impl HttpArchivePorts {
    pub fn new() -> Result<Self, PipelineError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| PipelineError::Message(format!("cannot build http client: {err}")))?;

        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self {
            client,
            show_progress: true,
        }
    }

    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    fn progress_bar(&self, total: Option<u64>) -> ProgressBar {
        let draw_target = if self.show_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(total, draw_target);

        let template = match total {
            Some(_) => "{spinner:.yellow} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            None => "{spinner:.yellow} {bytes} downloaded",
        };
        let style = ProgressStyle::with_template(template)
            .expect("invalid progress style template")
            .progress_chars("=> ");
        bar.set_style(style);

        bar
    }
}

impl ArchivePorts for HttpArchivePorts {
    fn download(&self, url: &str, dest: &Path) -> Result<(), PipelineError> {
        let download_error = |reason: String| PipelineError::Download {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|err| download_error(err.to_string()))?;
        tracing::debug!(
            status = %response.status(),
            length = ?response.content_length(),
            "download response"
        );

        let file = fs::File::create(dest)
            .map_err(|err| download_error(format!("cannot create {}: {err}", dest.display())))?;
        let bar = self.progress_bar(response.content_length());
        let mut writer = bar.wrap_write(BufWriter::new(file));

        let written = response
            .copy_to(&mut writer)
            .map_err(|err| download_error(err.to_string()))?;
        writer
            .flush()
            .map_err(|err| download_error(err.to_string()))?;
        bar.finish_and_clear();

        tracing::info!(bytes = written, path = %dest.display(), "archive downloaded");
        Ok(())
    }

    fn unpack(&self, archive: &Path, dest_root: &Path) -> Result<(), PipelineError> {
        let extract_error = |source: io::Error| PipelineError::Extract {
            archive: archive.to_path_buf(),
            source,
        };

        let mut file = fs::File::open(archive).map_err(extract_error)?;
        let mut magic = [0u8; 2];
        let gzipped = match file.read_exact(&mut magic) {
            Ok(()) => magic == GZIP_MAGIC,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => false,
            Err(err) => return Err(extract_error(err)),
        };
        file.seek(SeekFrom::Start(0)).map_err(extract_error)?;

        tracing::debug!(archive = %archive.display(), gzipped, "unpacking");
        // tar refuses entries that would land outside dest_root
        let result = if gzipped {
            tar::Archive::new(GzDecoder::new(file)).unpack(dest_root)
        } else {
            tar::Archive::new(file).unpack(dest_root)
        };
        result.map_err(extract_error)
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        let mut files = Vec::new();

        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|err| PipelineError::Message(err.to_string()))?;

            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        tracing::debug!(dir = %dir.display(), count = files.len(), "listed files");
        Ok(files)
    }
}

fn file_name(path: &Path) -> Result<&OsStr, PipelineError> {
    path.file_name()
        .ok_or_else(|| PipelineError::Converter(format!("not a file path: {}", path.display())))
}

/// Drives the `paddle2onnx` command line tool.
pub struct Paddle2OnnxCli {
    program: PathBuf,
}

impl Paddle2OnnxCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, job: &ConversionJob) -> Result<Command, PipelineError> {
        let model_dir = job
            .model_file
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let mut command = Command::new(&self.program);
        command
            .arg("--model_dir")
            .arg(model_dir)
            .arg("--model_filename")
            .arg(file_name(&job.model_file)?)
            .arg("--params_filename")
            .arg(file_name(&job.params_file)?)
            .arg("--save_file")
            .arg(&job.output_file)
            .arg("--opset_version")
            .arg(job.opset_version.to_string())
            .arg("--enable_onnx_checker")
            .arg(if job.enable_checker { "True" } else { "False" });

        Ok(command)
    }
}

impl ModelConverter for Paddle2OnnxCli {
    fn convert(&self, job: &ConversionJob) -> Result<bool, PipelineError> {
        let mut command = self.command(job)?;
        tracing::info!(?command, "running converter");

        let output = command.output().map_err(|err| {
            PipelineError::Converter(format!("cannot run {}: {err}", self.program.display()))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stdout.lines().chain(stderr.lines()) {
            tracing::debug!(target: "paddle2onnx", "{line}");
        }

        if !output.status.success() {
            let last_line = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("no error output");
            return Err(PipelineError::Converter(format!(
                "{} exited with {}: {last_line}",
                self.program.display(),
                output.status
            )));
        }

        Ok(job.output_file.is_file())
    }
}

pub struct OnnxInspector;

impl OnnxInspector {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactInspector for OnnxInspector {
    fn inspect(&self, artifact: &Path) -> Result<ArtifactSummary, PipelineError> {
        let bytes = fs::read(artifact)?;
        let model = ModelProto::decode(bytes.as_slice())?;
        check_model(&model)?;

        tracing::debug!(
            producer_version = %model.producer_version,
            model_version = model.model_version,
            "model check passed"
        );
        Ok(summarize(&model))
    }
}

pub struct PathToolLocator;

impl PathToolLocator {
    pub fn new() -> Self {
        Self
    }
}

impl ToolLocator for PathToolLocator {
    fn locate(&self, tool: &Path) -> Option<PathBuf> {
        which::which(tool).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Rule,
    Heading,
    Step,
    Success,
    Warn,
    Error,
    Detail,
}

type StatusLine = (Level, String);

fn rule() -> StatusLine {
    (Level::Rule, "=".repeat(RULE_WIDTH))
}

fn tensor_lines(lines: &mut Vec<StatusLine>, label: &str, tensors: &[TensorSummary]) {
    lines.push((Level::Detail, format!("{label}:")));
    for tensor in tensors {
        lines.push((
            Level::Detail,
            format!("  {}: {}", tensor.name, tensor.shape()),
        ));
    }
}

fn render(event: &PipelineEvent<'_>) -> Vec<StatusLine> {
    match event {
        PipelineEvent::Banner(title) => vec![rule(), (Level::Heading, format!("  {title}")), rule()],
        PipelineEvent::ToolsMissing { missing, hint } => vec![
            (
                Level::Error,
                format!("required tools are not installed: {}", missing.join(", ")),
            ),
            (Level::Detail, "install them with:".to_string()),
            (Level::Detail, format!("  {hint}")),
        ],
        PipelineEvent::ModelDirPresent(dir) => vec![(
            Level::Success,
            format!("model directory already present: {}", dir.display()),
        )],
        PipelineEvent::DownloadStarted(url) => {
            vec![(Level::Step, format!("downloading model: {url}"))]
        }
        PipelineEvent::DownloadFinished(archive) => vec![(
            Level::Success,
            format!("download complete: {}", archive.display()),
        )],
        PipelineEvent::ExtractStarted(archive) => {
            vec![(Level::Step, format!("extracting {}", archive.display()))]
        }
        PipelineEvent::ExtractFinished(dir) => {
            vec![(Level::Success, format!("extracted: {}", dir.display()))]
        }
        PipelineEvent::ConvertStarted {
            model_file,
            output_file,
        } => vec![
            (Level::Step, "converting to ONNX".to_string()),
            (Level::Detail, format!("input model: {}", model_file.display())),
            (Level::Detail, format!("output file: {}", output_file.display())),
        ],
        PipelineEvent::Converted {
            output_file,
            size_bytes,
        } => vec![
            (Level::Success, "ONNX conversion complete".to_string()),
            (Level::Detail, format!("file: {}", output_file.display())),
            (Level::Detail, format!("size: {:.2} MB", size_mb(*size_bytes))),
        ],
        PipelineEvent::SizeBudgetExceeded {
            size_bytes,
            budget_bytes,
            next_step,
        } => vec![
            (
                Level::Warn,
                format!(
                    "model size {:.2} MB ({size_bytes} bytes) exceeds the {:.2} MB budget ({budget_bytes} bytes)",
                    size_mb(*size_bytes),
                    size_mb(*budget_bytes)
                ),
            ),
            (
                Level::Detail,
                "quantization is required to run on the target device".to_string(),
            ),
            (
                Level::Detail,
                format!("the next step ({next_step}) quantizes it automatically"),
            ),
        ],
        PipelineEvent::ConvertFailed(reason) => {
            vec![(Level::Error, format!("conversion failed: {reason}"))]
        }
        PipelineEvent::VerifyStarted(artifact) => vec![(
            Level::Step,
            format!("verifying ONNX model: {}", artifact.display()),
        )],
        PipelineEvent::Verified(summary) => {
            let opset = summary
                .opset_version
                .map_or_else(|| "none".to_string(), |version| version.to_string());
            let mut lines = vec![
                (Level::Success, "model check passed".to_string()),
                (Level::Heading, "model info:".to_string()),
                (Level::Detail, format!("IR version: {}", summary.ir_version)),
                (Level::Detail, format!("producer: {}", summary.producer_name)),
                (Level::Detail, format!("opset version: {opset}")),
            ];
            tensor_lines(&mut lines, "inputs", &summary.inputs);
            tensor_lines(&mut lines, "outputs", &summary.outputs);
            lines
        }
        PipelineEvent::VerifyFailed(reason) => vec![
            (Level::Warn, format!("model verification error: {reason}")),
            (
                Level::Detail,
                "(the conversion succeeded; only verification failed)".to_string(),
            ),
        ],
        PipelineEvent::Fatal(err) => vec![(Level::Error, err.to_string())],
        PipelineEvent::Finished { outcome, next_step } => {
            if outcome.produced {
                vec![
                    rule(),
                    (Level::Success, "all done".to_string()),
                    rule(),
                    (Level::Heading, "next step:".to_string()),
                    (Level::Detail, format!("  {next_step}")),
                ]
            } else {
                vec![(Level::Error, "conversion failed".to_string())]
            }
        }
    }
}

pub struct NoStatusReporter;

impl NoStatusReporter {
    pub fn new() -> Self {
        Self
    }
}

impl StatusReporter for NoStatusReporter {
    fn report(&self, _event: &PipelineEvent<'_>) {}
}

pub struct ConsoleReporter {
    term: Term,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
        }
    }
}

impl StatusReporter for ConsoleReporter {
    fn report(&self, event: &PipelineEvent<'_>) {
        for (level, text) in render(event) {
            let line = match level {
                Level::Rule => style(text).dim().to_string(),
                Level::Heading => style(text).bold().to_string(),
                Level::Step => format!("{} {}", style("▶").cyan(), style(text).cyan()),
                Level::Success => format!("✅ {}", style(text).green()),
                Level::Warn => format!("⚠️  {}", style(text).yellow()),
                Level::Error => format!("❌ {}", style(text).red()),
                Level::Detail => format!("   {text}"),
            };
            let _ = self.term.write_line(&line);
        }
    }
}

/// Unstyled output with textual prefixes, for pipes and logs.
pub struct LineReporter<W: Write> {
    writer: Mutex<W>,
}

impl LineReporter<io::Stdout> {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }
}

impl<W: Write> LineReporter<W> {
    pub fn with_writer(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(err) => err.into_inner(),
        }
    }
}

impl<W: Write> StatusReporter for LineReporter<W> {
    fn report(&self, event: &PipelineEvent<'_>) {
        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(err) => err.into_inner(),
        };

        for (level, text) in render(event) {
            let prefix = match level {
                Level::Rule | Level::Heading => "",
                Level::Step => "[..] ",
                Level::Success => "[ok] ",
                Level::Warn => "[warn] ",
                Level::Error => "[error] ",
                Level::Detail => "     ",
            };
            let _ = writeln!(writer, "{prefix}{text}");
        }
        let _ = writer.flush();
    }
}
