//! Pipeline configuration.
//!
//! Every field defaults to the built-in PP-OCRv3 recognition model setup, so
//! running without a config file converts the stock English model. A TOML
//! file may override any subset of fields:
//!
//! ```toml
//! [source]
//! url = "https://example.com/my_rec_infer.tar"
//! model_dir = "my_rec_infer"
//!
//! [convert]
//! size_budget_mb = 4.0
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::application::PipelineError;
use crate::domain::{
    CONVERTER_PROGRAM, MODEL_ARCHIVE_NAME, MODEL_DIR_NAME, MODEL_FILE_NAME, MODEL_URL, NEXT_STEP,
    OUTPUT_FILE_NAME, PARAMS_FILE_NAME, SIZE_BUDGET_MB, TARGET_OPSET_VERSION,
};

const MIN_OPSET_VERSION: i64 = 7;

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub convert: ConvertConfig,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct SourceConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_archive_name")]
    pub archive_name: String,
    #[serde(default = "default_model_dir")]
    pub model_dir: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ConvertConfig {
    #[serde(default = "default_model_filename")]
    pub model_filename: String,
    #[serde(default = "default_params_filename")]
    pub params_filename: String,
    #[serde(default = "default_output_file")]
    pub output_file: String,
    #[serde(default = "default_opset_version")]
    pub opset_version: i64,
    #[serde(default = "default_true")]
    pub enable_onnx_checker: bool,
    #[serde(default = "default_converter")]
    pub converter: PathBuf,
    #[serde(default = "default_size_budget_mb")]
    pub size_budget_mb: f64,
    #[serde(default = "default_next_step")]
    pub next_step: String,
}

fn default_url() -> String {
    MODEL_URL.to_string()
}
fn default_archive_name() -> String {
    MODEL_ARCHIVE_NAME.to_string()
}
fn default_model_dir() -> String {
    MODEL_DIR_NAME.to_string()
}
fn default_model_filename() -> String {
    MODEL_FILE_NAME.to_string()
}
fn default_params_filename() -> String {
    PARAMS_FILE_NAME.to_string()
}
fn default_output_file() -> String {
    OUTPUT_FILE_NAME.to_string()
}
fn default_opset_version() -> i64 {
    TARGET_OPSET_VERSION
}
fn default_true() -> bool {
    true
}
fn default_converter() -> PathBuf {
    PathBuf::from(CONVERTER_PROGRAM)
}
fn default_size_budget_mb() -> f64 {
    SIZE_BUDGET_MB
}
fn default_next_step() -> String {
    NEXT_STEP.to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            archive_name: default_archive_name(),
            model_dir: default_model_dir(),
        }
    }
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            model_filename: default_model_filename(),
            params_filename: default_params_filename(),
            output_file: default_output_file(),
            opset_version: default_opset_version(),
            enable_onnx_checker: default_true(),
            converter: default_converter(),
            size_budget_mb: default_size_budget_mb(),
            next_step: default_next_step(),
        }
    }
}

impl Config {
    /// Loads `path` when given, otherwise the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let contents = fs::read_to_string(path).map_err(|err| {
            PipelineError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        let config = Self::from_toml(&contents).map_err(|err| match err {
            PipelineError::Config(reason) => {
                PipelineError::Config(format!("{}: {reason}", path.display()))
            }
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, PipelineError> {
        let config: Self =
            toml::from_str(contents).map_err(|err| PipelineError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.convert.size_budget_mb > 0.0) {
            return Err(PipelineError::Config(format!(
                "size_budget_mb must be positive, got {}",
                self.convert.size_budget_mb
            )));
        }
        if self.convert.opset_version < MIN_OPSET_VERSION {
            return Err(PipelineError::Config(format!(
                "opset_version must be at least {MIN_OPSET_VERSION}, got {}",
                self.convert.opset_version
            )));
        }
        if self.source.model_dir.is_empty() || self.source.archive_name.is_empty() {
            return Err(PipelineError::Config(
                "model_dir and archive_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.source.model_dir, "en_PP-OCRv3_rec_infer");
        assert_eq!(config.convert.opset_version, 11);
        assert!(config.convert.enable_onnx_checker);
    }

    #[test]
    fn partial_section_merges_with_defaults() {
        let config = Config::from_toml("[convert]\nsize_budget_mb = 4.0\n").unwrap();
        assert_eq!(config.convert.size_budget_mb, 4.0);
        assert_eq!(config.convert.output_file, "ocr_model.onnx");
        assert_eq!(config.source, SourceConfig::default());
    }

    #[test]
    fn rejects_non_positive_budget() {
        let err = Config::from_toml("[convert]\nsize_budget_mb = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("size_budget_mb"));
    }

    #[test]
    fn rejects_ancient_opset() {
        let err = Config::from_toml("[convert]\nopset_version = 3\n").unwrap_err();
        assert!(err.to_string().contains("opset_version"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&temp_dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn no_file_means_defaults() {
        assert_eq!(Config::load(None).unwrap(), Config::default());
    }
}
