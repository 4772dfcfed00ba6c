//! `rago tools`
//!
//! The process registers no tools of its own (those come from an embedding
//! application or an MCP host); this surface lets an operator inspect and
//! toggle whatever a future integration has registered against the shared
//! registry passed in.

use anyhow::Result;
use rago_core::tools::Registry;

use crate::app::ToolsAction;

pub async fn run(action: ToolsAction, registry: &Registry) -> Result<()> {
    match action {
        ToolsAction::List => {
            for def in registry.definitions() {
                println!("{}\t{}", def.name, def.description);
            }
        }
        ToolsAction::Enable { name } => {
            registry.set_enabled(&name, true)?;
            println!("enabled {name}");
        }
        ToolsAction::Disable { name } => {
            registry.set_enabled(&name, false)?;
            println!("disabled {name}");
        }
    }
    Ok(())
}
