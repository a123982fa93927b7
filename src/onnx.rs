//! The subset of the ONNX protobuf schema needed to inspect a converted
//! model, and a structural checker over it.
//!
//! Field tags follow `onnx.proto`. Fields not declared here are skipped by
//! the decoder, so attributes, tensor payloads and metadata never get
//! materialised.

use std::collections::HashSet;

use crate::domain::{ArtifactSummary, Dim, TensorSummary};

const ONNX_DOMAIN: &str = "ai.onnx";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelProto {
    #[prost(int64, tag = "1")]
    pub ir_version: i64,
    #[prost(string, tag = "2")]
    pub producer_name: String,
    #[prost(string, tag = "3")]
    pub producer_version: String,
    #[prost(string, tag = "4")]
    pub domain: String,
    #[prost(int64, tag = "5")]
    pub model_version: i64,
    #[prost(message, optional, tag = "7")]
    pub graph: Option<GraphProto>,
    #[prost(message, repeated, tag = "8")]
    pub opset_import: Vec<OperatorSetIdProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperatorSetIdProto {
    #[prost(string, tag = "1")]
    pub domain: String,
    #[prost(int64, tag = "2")]
    pub version: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GraphProto {
    #[prost(message, repeated, tag = "1")]
    pub node: Vec<NodeProto>,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(message, repeated, tag = "5")]
    pub initializer: Vec<TensorProto>,
    #[prost(message, repeated, tag = "11")]
    pub input: Vec<ValueInfoProto>,
    #[prost(message, repeated, tag = "12")]
    pub output: Vec<ValueInfoProto>,
    #[prost(message, repeated, tag = "13")]
    pub value_info: Vec<ValueInfoProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeProto {
    #[prost(string, repeated, tag = "1")]
    pub input: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub output: Vec<String>,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub op_type: String,
    #[prost(string, tag = "7")]
    pub domain: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorProto {
    #[prost(int64, repeated, tag = "1")]
    pub dims: Vec<i64>,
    #[prost(int32, tag = "2")]
    pub data_type: i32,
    #[prost(string, tag = "8")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValueInfoProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub r#type: Option<TypeProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TypeProto {
    #[prost(oneof = "type_proto::Value", tags = "1")]
    pub value: Option<type_proto::Value>,
    #[prost(string, tag = "6")]
    pub denotation: String,
}

pub mod type_proto {
    /// Sequence, map, optional and sparse types are not decoded.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(message, tag = "1")]
        TensorType(super::TensorTypeProto),
    }
}

impl TypeProto {
    pub fn tensor_type(&self) -> Option<&TensorTypeProto> {
        match &self.value {
            Some(type_proto::Value::TensorType(tensor)) => Some(tensor),
            None => None,
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorTypeProto {
    #[prost(int32, tag = "1")]
    pub elem_type: i32,
    #[prost(message, optional, tag = "2")]
    pub shape: Option<TensorShapeProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorShapeProto {
    #[prost(message, repeated, tag = "1")]
    pub dim: Vec<Dimension>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Dimension {
    #[prost(oneof = "dimension::Value", tags = "1, 2")]
    pub value: Option<dimension::Value>,
    #[prost(string, tag = "3")]
    pub denotation: String,
}

pub mod dimension {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(int64, tag = "1")]
        DimValue(i64),
        #[prost(string, tag = "2")]
        DimParam(String),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    #[error("ir_version is not set")]
    MissingIrVersion,
    #[error("model does not import any operator set")]
    NoOpsetImport,
    #[error("operator set domain '{0}' is imported more than once")]
    DuplicateOpsetDomain(String),
    #[error("model has no graph")]
    MissingGraph,
    #[error("{kind} #{index} has an empty name")]
    UnnamedValue { kind: &'static str, index: usize },
    #[error("{kind} '{name}' has no tensor type")]
    MissingTensorType { kind: &'static str, name: String },
    #[error("{kind} '{name}' has an undefined element type")]
    UndefinedElemType { kind: &'static str, name: String },
    #[error("initializer '{0}' is defined more than once")]
    DuplicateInitializer(String),
    #[error("node #{0} has no op_type")]
    MissingOpType(usize),
    #[error("node {node} uses domain '{domain}' which is not imported")]
    UnimportedDomain { node: String, domain: String },
    #[error("node {node} consumes '{input}' before it is defined")]
    UndefinedInput { node: String, input: String },
    #[error("value '{0}' is produced more than once")]
    DuplicateOutput(String),
    #[error("graph output '{0}' is never produced")]
    UnproducedOutput(String),
}

fn canonical_domain(domain: &str) -> &str {
    if domain == ONNX_DOMAIN { "" } else { domain }
}

fn node_label(node: &NodeProto, index: usize) -> String {
    if node.name.is_empty() {
        format!("#{index} ({})", node.op_type)
    } else {
        format!("'{}'", node.name)
    }
}

pub fn check_model(model: &ModelProto) -> Result<(), CheckError> {
    if model.ir_version <= 0 {
        return Err(CheckError::MissingIrVersion);
    }
    if model.opset_import.is_empty() {
        return Err(CheckError::NoOpsetImport);
    }

    let mut domains = HashSet::new();
    for opset in &model.opset_import {
        let domain = canonical_domain(&opset.domain);
        if !domains.insert(domain) {
            return Err(CheckError::DuplicateOpsetDomain(opset.domain.clone()));
        }
    }

    let graph = model.graph.as_ref().ok_or(CheckError::MissingGraph)?;
    check_graph(graph, &domains)
}

fn check_value_info(
    kind: &'static str,
    index: usize,
    value: &ValueInfoProto,
) -> Result<(), CheckError> {
    if value.name.is_empty() {
        return Err(CheckError::UnnamedValue { kind, index });
    }

    let tensor = value
        .r#type
        .as_ref()
        .and_then(TypeProto::tensor_type)
        .ok_or_else(|| CheckError::MissingTensorType {
            kind,
            name: value.name.clone(),
        })?;
    if tensor.elem_type == 0 {
        return Err(CheckError::UndefinedElemType {
            kind,
            name: value.name.clone(),
        });
    }

    Ok(())
}

fn check_graph(graph: &GraphProto, domains: &HashSet<&str>) -> Result<(), CheckError> {
    for (kind, values) in [
        ("graph input", &graph.input),
        ("graph output", &graph.output),
        ("value_info", &graph.value_info),
    ] {
        for (index, value) in values.iter().enumerate() {
            check_value_info(kind, index, value)?;
        }
    }

    let mut defined: HashSet<&str> = HashSet::new();

    for (index, initializer) in graph.initializer.iter().enumerate() {
        if initializer.name.is_empty() {
            return Err(CheckError::UnnamedValue {
                kind: "initializer",
                index,
            });
        }
        if initializer.data_type == 0 {
            return Err(CheckError::UndefinedElemType {
                kind: "initializer",
                name: initializer.name.clone(),
            });
        }
        if !defined.insert(&initializer.name) {
            return Err(CheckError::DuplicateInitializer(initializer.name.clone()));
        }
    }

    // older exporters list initializers as graph inputs too
    defined.extend(graph.input.iter().map(|input| input.name.as_str()));

    for (index, node) in graph.node.iter().enumerate() {
        if node.op_type.is_empty() {
            return Err(CheckError::MissingOpType(index));
        }
        if !domains.contains(canonical_domain(&node.domain)) {
            return Err(CheckError::UnimportedDomain {
                node: node_label(node, index),
                domain: node.domain.clone(),
            });
        }

        // empty names mark omitted optional inputs and outputs
        for input in node.input.iter().filter(|name| !name.is_empty()) {
            if !defined.contains(input.as_str()) {
                return Err(CheckError::UndefinedInput {
                    node: node_label(node, index),
                    input: input.clone(),
                });
            }
        }
        for output in node.output.iter().filter(|name| !name.is_empty()) {
            if !defined.insert(output) {
                return Err(CheckError::DuplicateOutput(output.clone()));
            }
        }
    }

    for output in &graph.output {
        if !defined.contains(output.name.as_str()) {
            return Err(CheckError::UnproducedOutput(output.name.clone()));
        }
    }

    Ok(())
}

fn tensor_summary(value: &ValueInfoProto) -> TensorSummary {
    let dims: Vec<Dim> = value
        .r#type
        .as_ref()
        .and_then(TypeProto::tensor_type)
        .and_then(|tensor| tensor.shape.as_ref())
        .map(|shape| {
            shape
                .dim
                .iter()
                .map(|dim| match dim.value {
                    Some(dimension::Value::DimValue(value)) => Dim::from_value(value),
                    _ => Dim::Dynamic,
                })
                .collect()
        })
        .unwrap_or_default();

    TensorSummary {
        name: value.name.clone(),
        dims,
    }
}

pub fn summarize(model: &ModelProto) -> ArtifactSummary {
    let (inputs, outputs) = match &model.graph {
        Some(graph) => (
            graph.input.iter().map(tensor_summary).collect(),
            graph.output.iter().map(tensor_summary).collect(),
        ),
        None => (Vec::new(), Vec::new()),
    };

    ArtifactSummary {
        ir_version: model.ir_version,
        producer_name: model.producer_name.clone(),
        opset_version: model.opset_import.first().map(|opset| opset.version),
        inputs,
        outputs,
    }
}
