use std::fmt;
use std::path::PathBuf;

pub const MODEL_URL: &str =
    "https://paddleocr.bj.bcebos.com/PP-OCRv3/english/en_PP-OCRv3_rec_infer.tar";
pub const MODEL_ARCHIVE_NAME: &str = "en_PP-OCRv3_rec_infer.tar";
pub const MODEL_DIR_NAME: &str = "en_PP-OCRv3_rec_infer";
pub const MODEL_FILE_NAME: &str = "inference.pdmodel";
pub const PARAMS_FILE_NAME: &str = "inference.pdiparams";
pub const OUTPUT_FILE_NAME: &str = "ocr_model.onnx";
pub const TARGET_OPSET_VERSION: i64 = 11;
pub const SIZE_BUDGET_MB: f64 = 2.5;
pub const CONVERTER_PROGRAM: &str = "paddle2onnx";
pub const INSTALL_HINT: &str = "pip install paddlepaddle paddle2onnx onnx";
pub const NEXT_STEP: &str = "bash 02_convert_to_stm32.sh";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[allow(clippy::cast_precision_loss)]
pub fn size_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn budget_bytes(budget_mb: f64) -> u64 {
    (budget_mb * BYTES_PER_MB) as u64
}

/// Strictly greater: an artifact of exactly the budget still fits.
pub fn exceeds_size_budget(size_bytes: u64, budget_bytes: u64) -> bool {
    size_bytes > budget_bytes
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub model_file: PathBuf,
    pub params_file: PathBuf,
    pub output_file: PathBuf,
    pub opset_version: i64,
    pub enable_checker: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Produced { size_bytes: u64 },
    Failed { reason: String },
}

impl ConversionOutcome {
    pub fn is_produced(&self) -> bool {
        matches!(self, ConversionOutcome::Produced { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    Fixed(u64),
    Dynamic,
}

impl Dim {
    /// Zero and negative values are unset dimensions in the wire format.
    pub fn from_value(value: i64) -> Self {
        match u64::try_from(value) {
            Ok(n) if n > 0 => Dim::Fixed(n),
            _ => Dim::Dynamic,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Dynamic => f.write_str("?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSummary {
    pub name: String,
    pub dims: Vec<Dim>,
}

impl TensorSummary {
    pub fn shape(&self) -> String {
        let dims: Vec<String> = self.dims.iter().map(ToString::to_string).collect();
        format!("[{}]", dims.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    pub ir_version: i64,
    pub producer_name: String,
    pub opset_version: Option<i64>,
    pub inputs: Vec<TensorSummary>,
    pub outputs: Vec<TensorSummary>,
}

/// Artifact production and verification are reported independently.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub produced: bool,
    pub verified: bool,
}

impl PipelineOutcome {
    pub fn exit_code(&self) -> u8 {
        if self.produced { 0 } else { 1 }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub found: Vec<(String, PathBuf)>,
    pub missing: Vec<String>,
}

impl PreflightReport {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}
