//! CLI argument definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rago")]
#[command(author, version, about = "Local-first retrieval-augmented generation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Path to the database file (overrides the configured default)
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest a document into the knowledge base
    Ingest(IngestArgs),

    /// Query the knowledge base
    Query(QueryArgs),

    /// List ingested documents
    Ls(LsArgs),

    /// Delete all documents, chunks, and embeddings
    Reset,

    /// Export documents and chunks to a JSON file
    Export(ExportArgs),

    /// Import documents and chunks from a JSON file
    Import(ImportArgs),

    /// Start the MCP tool-host server on stdio
    Serve,

    /// Manage registered tools
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },

    /// Validate or run a workflow definition
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Args)]
pub struct IngestArgs {
    /// Path to the file to ingest
    pub path: PathBuf,

    /// Collection to ingest into
    #[arg(long, default_value = "default")]
    pub collection: String,

    /// Chunking method: token or sentence
    #[arg(long)]
    pub chunk_method: Option<String>,

    #[arg(long)]
    pub chunk_size: Option<usize>,

    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    /// Extract summary/keyword metadata via the configured extractor
    #[arg(long)]
    pub extract_metadata: bool,
}

#[derive(Args)]
pub struct QueryArgs {
    /// The question to ask
    pub query: Vec<String>,

    /// Number of chunks to retrieve
    #[arg(short = 'n', long, default_value = "5")]
    pub top_k: usize,

    /// Restrict retrieval to one collection
    #[arg(long)]
    pub collection: Option<String>,
}

#[derive(Args)]
pub struct LsArgs {
    /// Restrict the listing to one collection
    #[arg(long)]
    pub collection: Option<String>,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Output file path
    pub path: PathBuf,

    /// Restrict the export to one collection
    #[arg(long)]
    pub collection: Option<String>,

    /// Omit chunk vectors to shrink the file
    #[arg(long)]
    pub no_vectors: bool,
}

#[derive(Args)]
pub struct ImportArgs {
    /// Input file path
    pub path: PathBuf,

    /// Skip documents that already exist instead of overwriting them
    #[arg(long)]
    pub skip_existing: bool,
}

#[derive(Subcommand)]
pub enum ToolsAction {
    /// List registered tools
    List,
    /// Enable a registered tool
    Enable { name: String },
    /// Disable a registered tool
    Disable { name: String },
}

#[derive(Subcommand)]
pub enum WorkflowAction {
    /// Validate a workflow definition file (JSON) without running it
    Validate { path: PathBuf },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
