//! Operator registry: maps canonical operator types to runtime handlers.
//!
//! A registry is built once (usually [`OperatorRegistry::with_builtins`] plus any third-party
//! handlers) and passed by reference into the deduplicator and the output assembler. There is
//! no process-wide registry.

mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codegen::utils::{escape_c_string, render_param};
use crate::graph::{ConstructParam, TypeSignature};

pub use builtin::{builtin_descriptors, DEFAULT_HEADER};

/// Expected shape of one construction parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    Str,
    Ident,
    List,
}

impl ParamKind {
    pub fn matches(self, param: &ConstructParam) -> bool {
        matches!(
            (self, param),
            (ParamKind::Int, ConstructParam::Int(_))
                | (ParamKind::Float, ConstructParam::Float(_))
                | (ParamKind::Bool, ConstructParam::Bool(_))
                | (ParamKind::Str, ConstructParam::Str(_))
                | (ParamKind::Ident, ConstructParam::Ident(_))
                | (ParamKind::List, ConstructParam::List(_))
        )
    }
}

/// Element kind that becomes a template argument of the runtime class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSlot {
    Input(usize),
    Output(usize),
}

/// Runtime-interface metadata for one canonical operator type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorDescriptor {
    pub op_type: String,
    /// Default implementation family, e.g. `ReferenceOperators`.
    pub namespace: String,
    /// Runtime class implementing the operator.
    pub class_name: String,
    /// Positional input port names; their count is the fixed input arity.
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub params: Vec<ParamKind>,
    #[serde(default)]
    pub template: Vec<TypeSlot>,
    #[serde(default)]
    pub headers: Vec<String>,
}

impl OperatorDescriptor {
    pub fn new(op_type: &str, namespace: &str, class_name: &str) -> Self {
        Self {
            op_type: op_type.to_string(),
            namespace: namespace.to_string(),
            class_name: class_name.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Vec::new(),
            template: Vec::new(),
            headers: vec![DEFAULT_HEADER.to_string()],
        }
    }

    pub fn ports(mut self, inputs: &[&str], outputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|port| port.to_string()).collect();
        self.outputs = outputs.iter().map(|port| port.to_string()).collect();
        self
    }

    pub fn params(mut self, params: &[ParamKind]) -> Self {
        self.params = params.to_vec();
        self
    }

    pub fn template(mut self, slots: &[TypeSlot]) -> Self {
        self.template = slots.to_vec();
        self
    }

    pub fn header(mut self, header: &str) -> Self {
        self.headers.push(header.to_string());
        self
    }
}

/// Everything a handler needs to render the fragments of one deduplicated instance.
#[derive(Debug, Clone, Copy)]
pub struct InstanceView<'a> {
    pub var: &'a str,
    pub namespace: &'a str,
    pub signature: &'a TypeSignature,
    pub params: &'a [ConstructParam],
}

/// One evaluation site: the instance plus the tensors bound to each port.
#[derive(Debug, Clone)]
pub struct EvalView<'a> {
    pub instance: InstanceView<'a>,
    pub context_var: &'a str,
    pub inputs: Vec<(&'a str, &'a str)>,
    pub outputs: Vec<(&'a str, &'a str)>,
}

/// Supplies the declare/construct/evaluate fragments for one operator type.
///
/// The default methods render the reference runtime's calling convention; plugins override
/// them to target other runtimes.
pub trait OperatorHandler: Send + Sync {
    fn descriptor(&self) -> &OperatorDescriptor;

    /// Fully qualified runtime type, e.g. `ReferenceOperators::AddOperator<float>`.
    fn qualified_type(&self, instance: &InstanceView<'_>) -> String {
        let descriptor = self.descriptor();
        let mut ty = String::new();
        if !instance.namespace.is_empty() {
            ty.push_str(instance.namespace);
            ty.push_str("::");
        }
        ty.push_str(&descriptor.class_name);
        if !descriptor.template.is_empty() {
            let args: Vec<&str> = descriptor
                .template
                .iter()
                .filter_map(|slot| match slot {
                    TypeSlot::Input(i) => instance.signature.inputs.get(*i),
                    TypeSlot::Output(i) => instance.signature.outputs.get(*i),
                })
                .map(|dtype| dtype.c_type())
                .collect();
            ty.push('<');
            ty.push_str(&args.join(", "));
            ty.push('>');
        }
        ty
    }

    fn declare(&self, instance: &InstanceView<'_>) -> String {
        format!("{} {};", self.qualified_type(instance), instance.var)
    }

    /// `None` when the default-constructed declaration is already complete.
    fn construct(&self, instance: &InstanceView<'_>) -> Option<String> {
        if instance.params.is_empty() {
            return None;
        }
        let args: Vec<String> = instance.params.iter().map(render_param).collect();
        Some(format!(
            "{} = {}({});",
            instance.var,
            self.qualified_type(instance),
            args.join(", ")
        ))
    }

    fn evaluate(&self, call: &EvalView<'_>) -> String {
        let ports = |bindings: &[(&str, &str)]| -> String {
            let pairs: Vec<String> = bindings
                .iter()
                .map(|(port, tensor)| {
                    format!(
                        "{{\"{}\", \"{}\"}}",
                        escape_c_string(port),
                        escape_c_string(tensor)
                    )
                })
                .collect();
            format!("{{{}}}", pairs.join(", "))
        };
        format!(
            "{}.push({}, {}, {});",
            call.context_var,
            call.instance.var,
            ports(&call.inputs),
            ports(&call.outputs)
        )
    }
}

/// Handler that renders every fragment from its descriptor alone.
#[derive(Debug, Clone)]
pub struct SnippetHandler {
    descriptor: OperatorDescriptor,
}

impl SnippetHandler {
    pub fn new(descriptor: OperatorDescriptor) -> Self {
        Self { descriptor }
    }
}

impl OperatorHandler for SnippetHandler {
    fn descriptor(&self) -> &OperatorDescriptor {
        &self.descriptor
    }
}

#[derive(Clone, Default)]
pub struct OperatorRegistry {
    handlers: HashMap<String, Arc<dyn OperatorHandler>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the reference runtime's operator set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for descriptor in builtin_descriptors() {
            registry.register_descriptor(descriptor);
        }
        registry
    }

    /// Installs a handler, returning the one it replaced.
    pub fn register(
        &mut self,
        handler: Arc<dyn OperatorHandler>,
    ) -> Option<Arc<dyn OperatorHandler>> {
        let op_type = handler.descriptor().op_type.clone();
        self.handlers.insert(op_type, handler)
    }

    pub fn register_descriptor(
        &mut self,
        descriptor: OperatorDescriptor,
    ) -> Option<Arc<dyn OperatorHandler>> {
        self.register(Arc::new(SnippetHandler::new(descriptor)))
    }

    pub fn get(&self, op_type: &str) -> Option<&Arc<dyn OperatorHandler>> {
        self.handlers.get(op_type)
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.handlers.contains_key(op_type)
    }

    pub fn op_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("op_types", &self.op_types())
            .finish()
    }
}
