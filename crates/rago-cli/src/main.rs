//! Rago CLI
//!
//! Thin command-line wrappers over `rago-core`'s ingestion pipeline, hybrid
//! retriever, tool executor, and workflow engine.

use anyhow::Result;
use clap::Parser;
use rago_core::config::Config;
use rago_core::store::Database;
use rago_core::tools::Registry;

mod app;
mod commands;

use app::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    let db_path = cli.db_path.unwrap_or_else(|| config.stores.db_path.clone());
    let db = Database::open(&db_path)?;
    db.initialize()?;

    let result = match cli.command {
        Commands::Ingest(args) => commands::ingest::run(args, &db, &config).await,
        Commands::Query(args) => commands::query::run(args, &db, &config, cli.format).await,
        Commands::Ls(args) => commands::ls::run(args, &db, cli.format).await,
        Commands::Reset => commands::reset::run(&db).await,
        Commands::Export(args) => commands::export::run_export(args, &db).await,
        Commands::Import(args) => commands::export::run_import(args, &db).await,
        Commands::Serve => commands::serve::run(&config).await,
        Commands::Tools { action } => {
            let registry = Registry::new();
            commands::tools::run(action, &registry).await
        }
        Commands::Workflow { action } => commands::workflow::run(action).await,
    };

    if let Err(e) = &result {
        eprintln!("error: {e}");
        let exit_code = e
            .downcast_ref::<rago_core::RagoError>()
            .map(|err| err.exit_code())
            .unwrap_or(1);
        std::process::exit(exit_code);
    }

    Ok(())
}
