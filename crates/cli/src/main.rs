//! `workflow-visualizer` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check a workflow graph file and list its problems.
//! - `layout`: print the canvas position of every node.
//! - `plan`: print the remote operations that would turn one graph into another.
//!
//! Graph files are JSON `WorkflowDocument`s (`{ "nodes": [...], "links": [...] }`).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use editor::{dag, plan_waves, validation, Graph, LayoutConfig, Orientation, Position, WorkflowDocument};

#[derive(Parser)]
#[command(
    name = "workflow-visualizer",
    about = "Inspect and reconcile workflow job template graphs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow graph file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Lay out a workflow graph and print node positions as JSON.
    Layout {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// `left_to_right` or `top_to_bottom`.
        #[arg(long, env = "WORKFLOW_LAYOUT_ORIENTATION", default_value = "left_to_right")]
        orientation: Orientation,
        /// Distance between depth columns.
        #[arg(long, env = "WORKFLOW_LAYOUT_COLUMN_WIDTH", default_value_t = 260.0)]
        column_width: f64,
        /// Distance between sibling rows.
        #[arg(long, env = "WORKFLOW_LAYOUT_ROW_HEIGHT", default_value_t = 100.0)]
        row_height: f64,
    },
    /// Print the remote operations needed to save `edited` over `baseline`.
    Plan {
        /// The graph as the server holds it.
        baseline: PathBuf,
        /// The graph after editing.
        edited: PathBuf,
        /// Print the operations as JSON instead of one per line.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let graph = read_graph(&path)?;

            for warning in validation::warnings(&graph) {
                eprintln!("warning: {warning}");
            }
            let errors = validation::validate(&graph);
            if !errors.is_empty() {
                for err in &errors {
                    eprintln!("error: {err}");
                }
                bail!("{} has {} validation error(s)", path.display(), errors.len());
            }

            let order = dag::topological_order(&graph)?;
            println!("✅ Workflow is valid. Execution order: {order:?}");
        }
        Command::Layout { path, orientation, column_width, row_height } => {
            let graph = read_graph(&path)?;
            let config = LayoutConfig {
                origin: Position::default(),
                column_width,
                row_height,
                orientation,
            };
            let positions = editor::layout(&graph, &config);
            println!("{}", serde_json::to_string_pretty(&positions)?);
        }
        Command::Plan { baseline, edited, json } => {
            let baseline = read_graph(&baseline)?;
            let edited = read_graph(&edited)?;

            let waves = plan_waves(&baseline, &edited);
            info!("{} operations in {} waves", waves.iter().map(Vec::len).sum::<usize>(), waves.len());

            if json {
                println!("{}", serde_json::to_string_pretty(&waves)?);
                return Ok(());
            }
            if waves.is_empty() {
                println!("Nothing to save.");
            }
            for (index, wave) in waves.iter().enumerate() {
                println!("wave {index}:");
                for op in wave {
                    println!("  {op}");
                }
            }
        }
    }

    Ok(())
}

/// Load a `WorkflowDocument` and assemble it into a graph.
fn read_graph(path: &Path) -> anyhow::Result<Graph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let document: WorkflowDocument = serde_json::from_str(&content)
        .with_context(|| format!("invalid workflow JSON in {}", path.display()))?;
    debug!(nodes = document.nodes.len(), links = document.links.len(), "loaded {}", path.display());

    Graph::from_parts(Uuid::new_v4(), document.nodes, document.links)
        .with_context(|| format!("inconsistent workflow graph in {}", path.display()))
}
