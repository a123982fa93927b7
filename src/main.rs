use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use paddle_ocr_onnx::{
    preflight, run_pipeline, Config, ConsoleReporter, HttpArchivePorts, LineReporter,
    OnnxInspector, Paddle2OnnxCli, PathToolLocator, PipelineError, PipelineEvent, Ports,
    StatusReporter, INSTALL_HINT,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Convert the PaddleOCR recognition model to ONNX")]
struct Cli {
    /// TOML file overriding the built-in model and conversion settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory the archive, model directory and output are placed in
    #[arg(long, value_name = "DIR", default_value = ".")]
    work_dir: PathBuf,

    /// Plain line output without colors or progress bars
    #[arg(long)]
    plain: bool,

    /// Skip checking that the converter is installed
    #[arg(long)]
    skip_preflight: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, reporter: &dyn StatusReporter) -> Result<u8, PipelineError> {
    let config = Config::load(cli.config.as_deref())?;

    if !cli.skip_preflight {
        let report = preflight(&PathToolLocator::new(), &[config.convert.converter.clone()]);
        if !report.is_satisfied() {
            reporter.report(&PipelineEvent::ToolsMissing {
                missing: &report.missing,
                hint: INSTALL_HINT,
            });
            return Ok(1);
        }
    }

    let mut archive = HttpArchivePorts::new()?;
    if cli.plain {
        archive = archive.without_progress();
    }
    let converter = Paddle2OnnxCli::new(config.convert.converter.clone());
    let inspector = OnnxInspector::new();
    let ports = Ports {
        archive: &archive,
        converter: &converter,
        inspector: &inspector,
    };

    match run_pipeline(&ports, reporter, &config, &cli.work_dir) {
        Ok(outcome) => Ok(outcome.exit_code()),
        // already reported by the pipeline
        Err(_) => Ok(1),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let reporter: Box<dyn StatusReporter> = if cli.plain {
        Box::new(LineReporter::new())
    } else {
        Box::new(ConsoleReporter::new())
    };

    match run(&cli, reporter.as_ref()) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            reporter.report(&PipelineEvent::Fatal(&err));
            ExitCode::FAILURE
        }
    }
}
