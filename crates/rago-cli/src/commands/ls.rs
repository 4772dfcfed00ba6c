//! `rago ls`

use anyhow::Result;
use rago_core::store::Database;

use crate::app::{LsArgs, OutputFormat};

pub async fn run(args: LsArgs, db: &Database, format: OutputFormat) -> Result<()> {
    let documents = db.list_documents(args.collection.as_deref())?;

    match format {
        OutputFormat::Json => {
            let value: Vec<_> = documents
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "id": d.id,
                        "collection": d.collection,
                        "path": d.path,
                        "url": d.url,
                        "created_at": d.created_at,
                        "updated_at": d.updated_at,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            for doc in &documents {
                println!("{}\t{}\t{}", doc.id, doc.collection, doc.path.as_deref().unwrap_or("-"));
            }
            println!("{} document(s)", documents.len());
        }
    }
    Ok(())
}
