pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod onnx;

pub use crate::application::{
    convert_model, fetch_model, preflight, run_pipeline, verify_artifact, ArchivePorts,
    ArtifactInspector, ModelConverter, PipelineError, PipelineEvent, Ports, StatusReporter,
    ToolLocator,
};
pub use crate::config::{Config, ConvertConfig, SourceConfig};
pub use crate::domain::{
    ArtifactSummary, ConversionJob, ConversionOutcome, Dim, PipelineOutcome, PreflightReport,
    TensorSummary, INSTALL_HINT,
};
pub use crate::infrastructure::{
    ConsoleReporter, HttpArchivePorts, LineReporter, NoStatusReporter, OnnxInspector,
    Paddle2OnnxCli, PathToolLocator,
};
