mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::Overrides;

#[derive(Parser)]
#[command(
    name = "arenac",
    about = "Compile frozen NN graphs into arena-planned C++",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan memory and emit the C++ source unit for a JSON graph
    Compile {
        /// Path to the graph JSON file
        graph: PathBuf,
        /// Output path (defaults to <model>.cpp next to the graph)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Name prefix of the generated entry point
        #[arg(long)]
        model: Option<String>,
        /// Fail if the arena would exceed this many bytes
        #[arg(long)]
        arena_limit: Option<usize>,
        /// Slot alignment in bytes (power of two)
        #[arg(long)]
        alignment: Option<usize>,
        /// Flush after every operator instead of batching
        #[arg(long)]
        eager: bool,
        /// JSON codegen config
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the JSON plan report without writing any source
    Plan {
        /// Path to the graph JSON file
        graph: PathBuf,
        #[arg(long)]
        arena_limit: Option<usize>,
        #[arg(long)]
        alignment: Option<usize>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arenac=info,arenac_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Compile {
            graph,
            output,
            model,
            arena_limit,
            alignment,
            eager,
            config,
        } => {
            let overrides = Overrides {
                model,
                arena_limit,
                alignment,
                eager,
            };
            let config = commands::resolve_config(config.as_deref(), &overrides)?;
            let compiled = commands::compile_file(&graph, &config)?;
            let output =
                output.unwrap_or_else(|| commands::default_output(&graph, &compiled.model_name));
            commands::write_source(&output, &compiled)?;
        }
        Commands::Plan {
            graph,
            arena_limit,
            alignment,
            config,
        } => {
            let overrides = Overrides {
                arena_limit,
                alignment,
                ..Overrides::default()
            };
            let config = commands::resolve_config(config.as_deref(), &overrides)?;
            let compiled = commands::compile_file(&graph, &config)?;
            println!("{}", commands::plan_json(&compiled)?);
        }
    }
    Ok(())
}
