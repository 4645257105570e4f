use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arenac::codegen::EmissionPolicy;
use arenac::{compile, CodegenConfig, CompiledModel, Graph, OperatorRegistry};

/// Command-line settings layered over the config file and the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub arena_limit: Option<usize>,
    pub alignment: Option<usize>,
    pub eager: bool,
}

/// File config, then environment, then command-line flags; later layers win.
pub fn resolve_config(path: Option<&Path>, overrides: &Overrides) -> Result<CodegenConfig> {
    let config = match path {
        Some(path) => CodegenConfig::load_json(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => CodegenConfig::default(),
    };
    let mut config = config
        .with_env_overrides()
        .context("invalid environment override")?;
    if let Some(model) = &overrides.model {
        config.model_name = Some(model.clone());
    }
    if let Some(limit) = overrides.arena_limit {
        config.arena_limit = Some(limit);
    }
    if let Some(alignment) = overrides.alignment {
        config.alignment = alignment;
    }
    if overrides.eager {
        config.emission = EmissionPolicy::Eager;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

pub fn compile_file(graph_path: &Path, config: &CodegenConfig) -> Result<CompiledModel> {
    let graph = Graph::load_json(graph_path)
        .with_context(|| format!("failed to load graph {}", graph_path.display()))?;
    let registry = OperatorRegistry::with_builtins();
    let model = compile(&graph, &registry, config)
        .with_context(|| format!("failed to compile graph '{}'", graph.name))?;
    Ok(model)
}

/// Defaults to `<model>.cpp` next to the graph file.
pub fn default_output(graph_path: &Path, model_name: &str) -> PathBuf {
    graph_path.with_file_name(format!("{model_name}.cpp"))
}

pub fn write_source(path: &Path, model: &CompiledModel) -> Result<()> {
    fs::write(path, &model.source)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        arena_bytes = model.plan.arena_size,
        "wrote generated source"
    );
    Ok(())
}

pub fn plan_json(model: &CompiledModel) -> Result<String> {
    model
        .report
        .to_json_string()
        .context("failed to serialize plan report")
}
