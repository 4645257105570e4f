use std::collections::{HashMap, HashSet};
use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hashing::stable_hash;

use super::types::{
    ConstantData, ConstructParam, DType, TensorInfo, TensorRole, TypeSignature,
};

/// Float payloads need a float kind; integer payloads must fit the declared kind.
fn check_constant_kind(tensor: &TensorInfo, data: &ConstantData) -> Result<(), GraphError> {
    match data {
        ConstantData::Float(_) if !tensor.dtype.is_float() => Err(GraphError::ConstantKind {
            name: tensor.name.clone(),
            dtype: tensor.dtype,
        }),
        ConstantData::Float(_) => Ok(()),
        ConstantData::Int(values) => {
            let Some((lo, hi)) = tensor.dtype.int_range() else {
                return Ok(());
            };
            match values.iter().find(|value| !(lo..=hi).contains(*value)) {
                Some(value) => Err(GraphError::ConstantRange {
                    name: tensor.name.clone(),
                    dtype: tensor.dtype,
                    value: *value,
                }),
                None => Ok(()),
            }
        }
    }
}

/// One operator occurrence in the topological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpNode {
    /// Canonical (legalized) operator type, e.g. `FullyConnected`.
    pub op_type: String,
    /// Overrides the handler's default runtime namespace when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ConstructParam>,
    /// Original node name from the source model, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl OpNode {
    pub fn new(op_type: impl Into<String>, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            op_type: op_type.into(),
            namespace: None,
            inputs: inputs.iter().map(|name| name.to_string()).collect(),
            outputs: outputs.iter().map(|name| name.to_string()).collect(),
            params: Vec::new(),
            label: None,
        }
    }

    pub fn with_params(mut self, params: Vec<ConstructParam>) -> Self {
        self.params = params;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub(crate) fn describe(&self, index: usize) -> String {
        match &self.label {
            Some(label) => format!("#{index} {} ({label})", self.op_type),
            None => format!("#{index} {}", self.op_type),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("tensor '{name}' is declared more than once")]
    DuplicateTensor { name: String },
    #[error("operator {op} references unknown tensor '{name}'")]
    UnknownTensor { op: String, name: String },
    #[error("graph input '{name}' is not a declared tensor")]
    UnknownInput { name: String },
    #[error("graph output '{name}' is not a declared tensor")]
    UnknownOutput { name: String },
    #[error("graph input '{name}' carries constant data")]
    ConstantInput { name: String },
    #[error("tensor '{name}' is listed twice as a graph {kind}")]
    DuplicateBoundary { name: String, kind: &'static str },
    #[error("constant '{name}' holds {found} values, its shape needs {expected}")]
    ConstantLength {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("constant '{name}' holds float values but is declared {dtype:?}")]
    ConstantKind { name: String, dtype: DType },
    #[error("constant '{name}' value {value} does not fit {dtype:?}")]
    ConstantRange {
        name: String,
        dtype: DType,
        value: i64,
    },
    #[error("tensor '{name}' is quantized but its element kind {dtype:?} is not an integer")]
    QuantizedNonInteger { name: String, dtype: DType },
}

#[derive(Debug, Error)]
pub enum GraphSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

#[derive(Debug, Error)]
pub enum GraphIoError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] GraphSerdeError),
}

/// Frozen computation graph handed over by the frontend, already in topological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    pub tensors: Vec<TensorInfo>,
    pub operators: Vec<OpNode>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tensors: Vec::new(),
            operators: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Checks name uniqueness and that every reference resolves to a declared tensor.
    ///
    /// Producer/consumer ordering is left to the liveness analysis.
    pub fn validate(&self) -> Result<(), GraphError> {
        let table = self.tensor_table()?;
        for tensor in &self.tensors {
            if let Some(data) = &tensor.data {
                let expected = tensor.element_count().unwrap_or(usize::MAX);
                if data.len() != expected {
                    return Err(GraphError::ConstantLength {
                        name: tensor.name.clone(),
                        expected,
                        found: data.len(),
                    });
                }
                check_constant_kind(tensor, data)?;
            }
            if tensor.quant.is_some() && !tensor.dtype.is_integer() {
                return Err(GraphError::QuantizedNonInteger {
                    name: tensor.name.clone(),
                    dtype: tensor.dtype,
                });
            }
        }
        let mut seen = HashSet::new();
        for name in &self.inputs {
            let Some(index) = table.get(name.as_str()) else {
                return Err(GraphError::UnknownInput { name: name.clone() });
            };
            if self.tensors[*index].is_constant() {
                return Err(GraphError::ConstantInput { name: name.clone() });
            }
            if !seen.insert(name.as_str()) {
                return Err(GraphError::DuplicateBoundary {
                    name: name.clone(),
                    kind: "input",
                });
            }
        }
        seen.clear();
        for name in &self.outputs {
            if !table.contains_key(name.as_str()) {
                return Err(GraphError::UnknownOutput { name: name.clone() });
            }
            if !seen.insert(name.as_str()) {
                return Err(GraphError::DuplicateBoundary {
                    name: name.clone(),
                    kind: "output",
                });
            }
        }
        for (index, op) in self.operators.iter().enumerate() {
            for name in op.inputs.iter().chain(op.outputs.iter()) {
                if !table.contains_key(name.as_str()) {
                    return Err(GraphError::UnknownTensor {
                        op: op.describe(index),
                        name: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Maps tensor names to their position in `tensors`.
    pub fn tensor_table(&self) -> Result<HashMap<&str, usize>, GraphError> {
        let mut table = HashMap::with_capacity(self.tensors.len());
        for (index, tensor) in self.tensors.iter().enumerate() {
            if table.insert(tensor.name.as_str(), index).is_some() {
                return Err(GraphError::DuplicateTensor {
                    name: tensor.name.clone(),
                });
            }
        }
        Ok(table)
    }

    pub fn tensor(&self, name: &str) -> Option<&TensorInfo> {
        self.tensors.iter().find(|tensor| tensor.name == name)
    }

    pub fn role(&self, name: &str) -> Option<TensorRole> {
        let tensor = self.tensor(name)?;
        if tensor.is_constant() {
            Some(TensorRole::Constant)
        } else if self.inputs.iter().any(|input| input == name) {
            Some(TensorRole::Input)
        } else {
            Some(TensorRole::Intermediate)
        }
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|output| output == name)
    }

    /// Element kinds of the operator's inputs and outputs, in port order.
    pub fn signature(&self, op: &OpNode) -> Option<TypeSignature> {
        let dtype_of = |name: &String| self.tensor(name).map(|tensor| tensor.dtype);
        let inputs: Option<Vec<DType>> = op.inputs.iter().map(dtype_of).collect();
        let outputs: Option<Vec<DType>> = op.outputs.iter().map(dtype_of).collect();
        Some(TypeSignature {
            inputs: inputs?,
            outputs: outputs?,
        })
    }

    /// Structural fingerprint of the graph, stable across runs and platforms.
    pub fn fingerprint(&self) -> Result<u64, GraphSerdeError> {
        Ok(stable_hash(self)?)
    }

    pub fn to_json_string(&self) -> Result<String, GraphSerdeError> {
        serde_json::to_string_pretty(self).map_err(GraphSerdeError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, GraphSerdeError> {
        serde_json::from_str(src).map_err(GraphSerdeError::from)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphIoError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, GraphIoError> {
        let contents = fs::read_to_string(path)?;
        Graph::from_json_str(&contents).map_err(GraphIoError::from)
    }
}

/// Incrementally assembles a [`Graph`] in topological order.
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(name),
        }
    }

    pub fn add_input(&mut self, name: &str, dtype: DType, shape: &[usize]) -> String {
        self.add_input_tensor(TensorInfo::new(name, dtype, shape))
    }

    pub fn add_input_tensor(&mut self, tensor: TensorInfo) -> String {
        let name = tensor.name.clone();
        self.graph.inputs.push(name.clone());
        self.graph.tensors.push(tensor);
        name
    }

    pub fn add_constant(&mut self, tensor: TensorInfo) -> String {
        let name = tensor.name.clone();
        self.graph.tensors.push(tensor);
        name
    }

    /// Appends an operator together with the declarations of the tensors it produces.
    pub fn emit_node(&mut self, node: OpNode, outputs: Vec<TensorInfo>) -> usize {
        self.graph.tensors.extend(outputs);
        self.graph.operators.push(node);
        self.graph.operators.len() - 1
    }

    pub fn emit(&mut self, op_type: &str, inputs: &[&str], outputs: Vec<TensorInfo>) -> usize {
        let names: Vec<&str> = outputs.iter().map(|tensor| tensor.name.as_str()).collect();
        let node = OpNode::new(op_type, inputs, &names);
        self.emit_node(node, outputs)
    }

    pub fn mark_output(&mut self, name: &str) {
        self.graph.outputs.push(name.to_string());
    }

    pub fn finish(self) -> Graph {
        self.graph
    }
}
