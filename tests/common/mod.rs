#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use paddle_ocr_onnx::onnx::{
    dimension, type_proto, Dimension, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    TensorShapeProto, TensorTypeProto, TypeProto, ValueInfoProto,
};
use paddle_ocr_onnx::{
    ArchivePorts, ArtifactInspector, ArtifactSummary, ConversionJob, LineReporter, ModelConverter,
    PipelineError,
};
use prost::Message;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn line_reporter() -> LineReporter<Cursor<Vec<u8>>> {
    LineReporter::with_writer(Cursor::new(Vec::new()))
}

pub fn output_of(reporter: LineReporter<Cursor<Vec<u8>>>) -> String {
    String::from_utf8(reporter.into_inner().into_inner()).unwrap()
}

pub fn populate_model_dir(work_dir: &Path, model_dir: &str) -> Result<PathBuf, std::io::Error> {
    let dir = work_dir.join(model_dir);
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("inference.pdmodel"), b"graph")?;
    fs::write(dir.join("inference.pdiparams"), b"weights")?;
    Ok(dir)
}

/// A tar archive holding `<model_dir>/inference.pdmodel` and
/// `<model_dir>/inference.pdiparams`.
pub fn model_tar(model_dir: &str) -> Result<Vec<u8>, std::io::Error> {
    let mut builder = tar::Builder::new(Vec::new());

    for (name, contents) in [
        ("inference.pdmodel", b"graph".as_slice()),
        ("inference.pdiparams", b"weights".as_slice()),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, format!("{model_dir}/{name}"), contents)?;
    }

    builder.into_inner()
}

fn tensor(name: &str, dims: &[i64]) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(TensorTypeProto {
                elem_type: 1,
                shape: Some(TensorShapeProto {
                    dim: dims
                        .iter()
                        .map(|value| Dimension {
                            value: Some(dimension::Value::DimValue(*value)),
                            denotation: String::new(),
                        })
                        .collect(),
                }),
            })),
            denotation: String::new(),
        }),
    }
}

pub fn recognition_model() -> ModelProto {
    ModelProto {
        ir_version: 7,
        producer_name: "PaddlePaddle".to_string(),
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: 11,
        }],
        graph: Some(GraphProto {
            name: "rec".to_string(),
            node: vec![NodeProto {
                input: vec!["x".to_string()],
                output: vec!["softmax_0.tmp_0".to_string()],
                op_type: "Softmax".to_string(),
                ..Default::default()
            }],
            input: vec![tensor("x", &[-1, 3, 48, -1])],
            output: vec![tensor("softmax_0.tmp_0", &[-1, -1, 97])],
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn recognition_model_bytes() -> Vec<u8> {
    recognition_model().encode_to_vec()
}

/// Serves a prebuilt archive instead of touching the network and delegates
/// the filesystem work to `inner`.
pub struct LocalArchivePorts<P: ArchivePorts> {
    pub archive_bytes: Option<Vec<u8>>,
    pub downloads: Cell<usize>,
    pub inner: P,
}

impl<P: ArchivePorts> LocalArchivePorts<P> {
    pub fn new(archive_bytes: Option<Vec<u8>>, inner: P) -> Self {
        Self {
            archive_bytes,
            downloads: Cell::new(0),
            inner,
        }
    }
}

impl<P: ArchivePorts> ArchivePorts for LocalArchivePorts<P> {
    fn download(&self, url: &str, dest: &Path) -> Result<(), PipelineError> {
        self.downloads.set(self.downloads.get() + 1);

        match &self.archive_bytes {
            Some(bytes) => Ok(fs::write(dest, bytes)?),
            None => Err(PipelineError::Download {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }

    fn unpack(&self, archive: &Path, dest_root: &Path) -> Result<(), PipelineError> {
        self.inner.unpack(archive, dest_root)
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        self.inner.list_files(dir)
    }
}

pub enum ConverterBehavior {
    Write(Vec<u8>),
    ClaimsSuccess,
    NotProduced,
    Fail(String),
}

pub struct FakeConverter {
    pub behavior: ConverterBehavior,
    pub jobs: RefCell<Vec<ConversionJob>>,
}

impl FakeConverter {
    pub fn new(behavior: ConverterBehavior) -> Self {
        Self {
            behavior,
            jobs: RefCell::new(Vec::new()),
        }
    }

    pub fn writing_bytes(size: usize) -> Self {
        Self::new(ConverterBehavior::Write(vec![0u8; size]))
    }

    pub fn calls(&self) -> usize {
        self.jobs.borrow().len()
    }
}

impl ModelConverter for FakeConverter {
    fn convert(&self, job: &ConversionJob) -> Result<bool, PipelineError> {
        self.jobs.borrow_mut().push(job.clone());

        match &self.behavior {
            ConverterBehavior::Write(bytes) => {
                fs::write(&job.output_file, bytes)?;
                Ok(true)
            }
            ConverterBehavior::ClaimsSuccess => Ok(true),
            ConverterBehavior::NotProduced => Ok(false),
            ConverterBehavior::Fail(reason) => Err(PipelineError::Converter(reason.clone())),
        }
    }
}

/// Wraps an inspector and counts how often it is asked.
pub struct CountingInspector<I: ArtifactInspector> {
    pub calls: Cell<usize>,
    pub inner: I,
}

impl<I: ArtifactInspector> CountingInspector<I> {
    pub fn new(inner: I) -> Self {
        Self {
            calls: Cell::new(0),
            inner,
        }
    }
}

impl<I: ArtifactInspector> ArtifactInspector for CountingInspector<I> {
    fn inspect(&self, artifact: &Path) -> Result<ArtifactSummary, PipelineError> {
        self.calls.set(self.calls.get() + 1);
        self.inner.inspect(artifact)
    }
}
