#![cfg(unix)]

mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use common::{populate_model_dir, TestResult};
use paddle_ocr_onnx::{
    convert_model, ConversionJob, ConversionOutcome, ConvertConfig, ModelConverter,
    NoStatusReporter, Paddle2OnnxCli, PathToolLocator, PipelineError, ToolLocator,
};

const MODEL_DIR: &str = "en_PP-OCRv3_rec_infer";

// writing a script while another test thread forks can leave it busy at exec
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

fn write_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf, std::io::Error> {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

fn job_in(work_dir: &Path) -> Result<ConversionJob, std::io::Error> {
    let model_dir = populate_model_dir(work_dir, MODEL_DIR)?;
    Ok(ConversionJob {
        model_file: model_dir.join("inference.pdmodel"),
        params_file: model_dir.join("inference.pdiparams"),
        output_file: work_dir.join("ocr_model.onnx"),
        opset_version: 11,
        enable_checker: true,
    })
}

#[test]
fn nonzero_exit_reports_last_stderr_line() -> TestResult {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|err| err.into_inner());
    let temp_dir = tempfile::tempdir()?;
    let script = write_script(
        temp_dir.path(),
        "paddle2onnx",
        "echo 'loading model' >&2\necho 'Unsupported op: foo' >&2\necho '' >&2\nexit 3",
    )?;

    let err = Paddle2OnnxCli::new(&script)
        .convert(&job_in(temp_dir.path())?)
        .unwrap_err();

    assert!(matches!(err, PipelineError::Converter(_)));
    let message = err.to_string();
    assert!(message.contains("exit status: 3"), "unexpected: {message}");
    assert!(message.ends_with("Unsupported op: foo"), "unexpected: {message}");
    Ok(())
}

#[test]
fn zero_exit_without_output_is_not_produced() -> TestResult {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|err| err.into_inner());
    let temp_dir = tempfile::tempdir()?;
    let script = write_script(temp_dir.path(), "paddle2onnx", "exit 0")?;

    let produced = Paddle2OnnxCli::new(&script).convert(&job_in(temp_dir.path())?)?;

    assert!(!produced);
    Ok(())
}

#[test]
fn writes_model_to_save_file() -> TestResult {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|err| err.into_inner());
    let temp_dir = tempfile::tempdir()?;
    let script = write_script(
        temp_dir.path(),
        "paddle2onnx",
        r#"while [ $# -gt 0 ]; do
  if [ "$1" = "--save_file" ]; then printf 'onnx' > "$2"; fi
  shift
done"#,
    )?;
    let job = job_in(temp_dir.path())?;

    let produced = Paddle2OnnxCli::new(&script).convert(&job)?;

    assert!(produced);
    assert_eq!(fs::read(&job.output_file)?, b"onnx");
    Ok(())
}

#[test]
fn silent_converter_leaves_no_stale_artifact_behind() -> TestResult {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|err| err.into_inner());
    let temp_dir = tempfile::tempdir()?;
    let script = write_script(temp_dir.path(), "paddle2onnx", "exit 0")?;
    let model_dir = populate_model_dir(temp_dir.path(), MODEL_DIR)?;
    fs::write(temp_dir.path().join("ocr_model.onnx"), vec![0u8; 3_000_000])?;

    let outcome = convert_model(
        &Paddle2OnnxCli::new(&script),
        &NoStatusReporter::new(),
        &ConvertConfig::default(),
        &model_dir,
        temp_dir.path(),
    )?;

    assert_eq!(
        outcome,
        ConversionOutcome::Failed {
            reason: "converter did not produce a model".to_string()
        }
    );
    Ok(())
}

#[test]
fn missing_program_is_a_converter_error() -> TestResult {
    let temp_dir = tempfile::tempdir()?;
    let converter = Paddle2OnnxCli::new(temp_dir.path().join("no-such-converter"));

    let err = converter.convert(&job_in(temp_dir.path())?).unwrap_err();

    assert!(err.to_string().contains("cannot run"));
    Ok(())
}

#[test]
fn path_locator_finds_executable_by_absolute_path() -> TestResult {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|err| err.into_inner());
    let temp_dir = tempfile::tempdir()?;
    let script = write_script(temp_dir.path(), "paddle2onnx", "exit 0")?;

    let locator = PathToolLocator::new();

    assert_eq!(locator.locate(&script), Some(script.clone()));
    assert_eq!(locator.locate(&temp_dir.path().join("absent-tool")), None);
    Ok(())
}
