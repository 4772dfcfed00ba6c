//! `rago reset`

use anyhow::Result;
use rago_core::store::Database;

pub async fn run(db: &Database) -> Result<()> {
    db.reset_documents()?;
    db.vector_reset()?;
    println!("reset complete");
    Ok(())
}
