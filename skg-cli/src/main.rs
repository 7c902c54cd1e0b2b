//! `skg`: a thin one-shot CLI test driver over the embedded graph engine,
//! exercising the minimal `Database` surface (`add_edge`, `has_vertex`,
//! `has_edge_between`, `predecessors`, `successors`) plus `flush`/`close`.
//! Not part of the core engine; the engine is a library, this is a test
//! harness around it.

use clap::{Parser, Subcommand};
use skg::Database;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "skg", version, arg_required_else_help = true)]
struct Cli {
    /// Database root directory. Falls back to the `SKG_ROOT` environment
    /// variable if omitted.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add (or update) an edge between two vertices, auto-creating both
    /// endpoints and the edge label if they don't already exist.
    AddEdge(AddEdgeArgs),
    /// Print "true" or "false" to stdout depending on whether the vertex exists.
    HasVertex(VertexArgs),
    /// Print "true" or "false" depending on whether any edge runs src -> dst.
    HasEdgeBetween(EdgeBetweenArgs),
    /// List the vertex ids reachable via one in-edge hop into `id`.
    Predecessors(NeighborArgs),
    /// List the vertex ids reachable via one out-edge hop from `id`.
    Successors(NeighborArgs),
    /// Flush in-memory state to disk without removing it.
    Flush,
}

#[derive(Parser)]
struct AddEdgeArgs {
    #[arg(long)]
    src: String,
    #[arg(long, default_value = "vertex")]
    src_label: String,
    #[arg(long)]
    dst: String,
    #[arg(long, default_value = "vertex")]
    dst_label: String,
    #[arg(long, default_value = "edge")]
    label: String,
    #[arg(long, default_value_t = 1.0)]
    weight: f32,
}

#[derive(Parser)]
struct VertexArgs {
    #[arg(long)]
    id: String,
}

#[derive(Parser)]
struct EdgeBetweenArgs {
    #[arg(long)]
    src: String,
    #[arg(long)]
    dst: String,
}

#[derive(Parser)]
struct NeighborArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    limit: Option<usize>,
}

fn resolve_root(explicit: Option<PathBuf>) -> Result<PathBuf, String> {
    explicit
        .or_else(|| std::env::var_os("SKG_ROOT").map(PathBuf::from))
        .ok_or_else(|| "database root required: pass --root or set SKG_ROOT".to_string())
}

fn run(cli: Cli) -> Result<(), String> {
    let root = resolve_root(cli.root)?;
    let db = Database::open(&root).map_err(|e| e.to_string())?;

    match cli.command {
        Commands::AddEdge(args) => {
            db.create_vertex_label(&args.src_label).map_err(|e| e.to_string())?;
            db.create_vertex_label(&args.dst_label).map_err(|e| e.to_string())?;
            db.create_edge_label(&args.label, &args.src_label, &args.dst_label)
                .map_err(|e| e.to_string())?;
            db.add_edge(
                &args.src,
                &args.src_label,
                &args.dst,
                &args.dst_label,
                &args.label,
                args.weight,
                Vec::new(),
                true,
            )
            .map_err(|e| e.to_string())?;
        }
        Commands::HasVertex(args) => {
            println!("{}", db.has_vertex(&args.id));
        }
        Commands::HasEdgeBetween(args) => {
            let has = db.has_edge_between(&args.src, &args.dst).map_err(|e| e.to_string())?;
            println!("{has}");
        }
        Commands::Predecessors(args) => {
            let ids = db.get_in_vertices(&args.id, args.limit).map_err(|e| e.to_string())?;
            for id in ids {
                println!("{id}");
            }
        }
        Commands::Successors(args) => {
            let ids = db.get_out_vertices(&args.id, args.limit).map_err(|e| e.to_string())?;
            for id in ids {
                println!("{id}");
            }
        }
        Commands::Flush => {}
    }

    db.close().map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}
