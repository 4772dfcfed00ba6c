//! `rago export` / `rago import`

use anyhow::Result;
use rago_core::export::{self, ImportMode, VectorInclusion};
use rago_core::store::Database;

use crate::app::{ExportArgs, ImportArgs};

pub async fn run_export(args: ExportArgs, db: &Database) -> Result<()> {
    let vectors = if args.no_vectors {
        VectorInclusion::Omit
    } else {
        VectorInclusion::Include
    };
    let file = export::export(db, args.collection.as_deref(), vectors)?;
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(&args.path, json)?;
    println!(
        "exported {} document(s), {} chunk(s) to {}",
        file.metadata.document_count,
        file.metadata.chunk_count,
        args.path.display()
    );
    Ok(())
}

pub async fn run_import(args: ImportArgs, db: &Database) -> Result<()> {
    let content = std::fs::read_to_string(&args.path)?;
    let file: export::ExportFile = serde_json::from_str(&content)?;
    let mode = if args.skip_existing {
        ImportMode::SkipExisting
    } else {
        ImportMode::Overwrite
    };
    let report = export::import(db, file, mode)?;
    println!(
        "imported {} document(s) ({} skipped), {} chunk(s)",
        report.documents_imported, report.documents_skipped, report.chunks_imported
    );
    Ok(())
}
