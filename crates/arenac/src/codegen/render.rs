use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::CodegenConfig;
use crate::graph::{ConstantData, Graph, QuantParams, TensorInfo};
use crate::plan::{InstanceId, InstanceTable, MemoryPlan, OperatorInstance, Placement};
use crate::registry::{EvalView, InstanceView, OperatorHandler, OperatorRegistry};

use super::utils::{
    emit_value_array, escape_c_string, format_f32, push_block, push_line, sanitize_symbol,
};
use super::{EmitError, EmitStep};

/// Renders assembled emission steps into a single C++ source unit.
///
/// All fragment text comes from the registry's handlers; the renderer only decides where
/// each fragment goes.
pub struct Renderer<'a> {
    pub graph: &'a Graph,
    pub plan: &'a MemoryPlan,
    pub instances: &'a InstanceTable,
    pub registry: &'a OperatorRegistry,
    pub config: &'a CodegenConfig,
    pub fingerprint: u64,
}

impl<'a> Renderer<'a> {
    pub fn model_name(&self) -> String {
        self.config
            .model_name
            .clone()
            .unwrap_or_else(|| sanitize_symbol(&self.graph.name))
    }

    pub fn render(&self, steps: &[EmitStep]) -> Result<String, EmitError> {
        let model = self.model_name();
        let ctx = self.config.context_var.as_str();
        let rom_symbols = self.rom_symbols();

        let mut headers: BTreeSet<String> = BTreeSet::new();
        headers.insert(self.config.runtime_header.clone());
        let mut declarations = String::new();
        let mut body = String::new();

        for step in steps {
            match step {
                EmitStep::Declare { instance } => {
                    let instance = self.instance(*instance)?;
                    let handler = self.handler(instance)?;
                    headers.extend(handler.descriptor().headers.iter().cloned());
                    let line = format!("static {}", handler.declare(&view(instance)));
                    push_line(&mut declarations, 0, &line);
                }
                EmitStep::Construct { instance } => {
                    let instance = self.instance(*instance)?;
                    if let Some(line) = self.handler(instance)?.construct(&view(instance)) {
                        push_line(&mut body, 1, &line);
                    }
                }
                EmitStep::Register { tensor } => {
                    let line = self.register_line(tensor, &rom_symbols)?;
                    push_line(&mut body, 1, &line);
                }
                EmitStep::Enqueue {
                    op_index, instance, ..
                } => {
                    let op = &self.graph.operators[*op_index];
                    let instance = self.instance(*instance)?;
                    let handler = self.handler(instance)?;
                    let descriptor = handler.descriptor();
                    let call = EvalView {
                        instance: view(instance),
                        context_var: ctx,
                        inputs: bind(&descriptor.inputs, &op.inputs),
                        outputs: bind(&descriptor.outputs, &op.outputs),
                    };
                    push_line(&mut body, 1, &handler.evaluate(&call));
                }
                EmitStep::Flush => push_line(&mut body, 1, &format!("{ctx}.eval();")),
            }
        }

        let mut module = String::new();
        let banner = format!(
            r#"
            // Generated by arenac from graph "{name}". Do not edit.
            // fingerprint: 0x{fingerprint:016x}
            // arena: {arena} bytes, alignment {alignment}
            "#,
            name = escape_c_string(&self.graph.name),
            fingerprint = self.fingerprint,
            arena = self.plan.arena_size,
            alignment = self.plan.alignment,
        );
        push_block(&mut module, 0, &banner);
        module.push('\n');
        for header in &headers {
            push_line(&mut module, 0, &format!("#include \"{}\"", escape_c_string(header)));
        }
        module.push('\n');
        push_line(&mut module, 0, "using namespace uTensor;");
        module.push('\n');
        push_line(
            &mut module,
            0,
            &format!(
                "const size_t {model}_arena_size = {};",
                self.plan.arena_size
            ),
        );

        let constants = self.constant_arrays(&rom_symbols)?;
        if !constants.is_empty() {
            module.push('\n');
            module.push_str(&constants);
        }
        if !declarations.is_empty() {
            module.push('\n');
            module.push_str(&declarations);
        }

        module.push('\n');
        push_line(&mut module, 0, &format!("void {model}_compute(Context& {ctx}) {{"));
        module.push_str(&body);
        push_line(&mut module, 0, "}");
        Ok(module)
    }

    fn instance(&self, id: InstanceId) -> Result<&'a OperatorInstance, EmitError> {
        self.instances
            .get(id)
            .ok_or_else(|| EmitError::MissingInstance {
                op: format!("instance {}", id.0),
            })
    }

    fn handler(
        &self,
        instance: &OperatorInstance,
    ) -> Result<&'a dyn OperatorHandler, EmitError> {
        self.registry
            .get(&instance.key.op_type)
            .map(|handler| handler.as_ref())
            .ok_or_else(|| EmitError::MissingHandler {
                op_type: instance.key.op_type.clone(),
            })
    }

    fn tensor(&self, name: &str) -> Result<&'a TensorInfo, EmitError> {
        self.graph
            .tensor(name)
            .ok_or_else(|| EmitError::MissingPlanEntry {
                tensor: name.to_string(),
            })
    }

    /// Unique array symbol for every read-only tensor.
    fn rom_symbols(&self) -> HashMap<String, String> {
        let mut used = HashSet::new();
        let mut symbols = HashMap::new();
        for entry in &self.plan.entries {
            if entry.placement != Placement::Rom {
                continue;
            }
            let base = format!("{}_data", sanitize_symbol(&entry.name));
            let mut symbol = base.clone();
            let mut suffix = 1;
            while !used.insert(symbol.clone()) {
                symbol = format!("{base}_{suffix}");
                suffix += 1;
            }
            symbols.insert(entry.name.clone(), symbol);
        }
        symbols
    }

    fn constant_arrays(&self, rom_symbols: &HashMap<String, String>) -> Result<String, EmitError> {
        let mut out = String::new();
        for entry in &self.plan.entries {
            let Some(symbol) = rom_symbols.get(&entry.name) else {
                continue;
            };
            let tensor = self.tensor(&entry.name)?;
            let values: Vec<String> = match &tensor.data {
                Some(ConstantData::Float(values)) => {
                    values.iter().map(|value| format_f32(*value)).collect()
                }
                Some(ConstantData::Int(values)) => {
                    values.iter().map(|value| value.to_string()).collect()
                }
                None => Vec::new(),
            };
            let line = format!(
                "static const {} {symbol}[{}] = {{{}}};",
                tensor.dtype.c_type(),
                values.len().max(1),
                emit_value_array(&values)
            );
            push_line(&mut out, 0, &line);
        }
        Ok(out)
    }

    fn register_line(
        &self,
        name: &str,
        rom_symbols: &HashMap<String, String>,
    ) -> Result<String, EmitError> {
        let tensor = self.tensor(name)?;
        let entry = self
            .plan
            .entry(name)
            .ok_or_else(|| EmitError::MissingPlanEntry {
                tensor: name.to_string(),
            })?;
        let dims: Vec<String> = tensor.shape.iter().map(|dim| dim.to_string()).collect();
        let (class, storage) = match entry.placement {
            Placement::Arena { offset, .. } => ("RamTensor", offset.to_string()),
            Placement::Rom => {
                let symbol = rom_symbols
                    .get(name)
                    .ok_or_else(|| EmitError::MissingPlanEntry {
                        tensor: name.to_string(),
                    })?;
                ("RomTensor", symbol.clone())
            }
        };
        let quant = tensor.quant.map(quant_arg).unwrap_or_default();
        Ok(format!(
            "{}.add(new {class}<{}>({{{}}}, {storage}{quant}), \"{}\", {});",
            self.config.context_var,
            tensor.dtype.c_type(),
            emit_value_array(&dims),
            escape_c_string(name),
            entry.refcount
        ))
    }
}

fn view(instance: &OperatorInstance) -> InstanceView<'_> {
    InstanceView {
        var: &instance.var,
        namespace: &instance.key.namespace,
        signature: &instance.key.signature,
        params: &instance.key.params,
    }
}

fn bind<'b>(ports: &'b [String], tensors: &'b [String]) -> Vec<(&'b str, &'b str)> {
    ports
        .iter()
        .zip(tensors)
        .map(|(port, tensor)| (port.as_str(), tensor.as_str()))
        .collect()
}

fn quant_arg(quant: QuantParams) -> String {
    format!(
        ", QuantParams({}, {})",
        format_f32(quant.scale),
        quant.zero_point
    )
}
