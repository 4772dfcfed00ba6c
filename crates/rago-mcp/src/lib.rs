//! Rago MCP Server
//!
//! Model Context Protocol tool host exposing a [`rago_core::tools::Registry`]
//! over JSON-RPC on stdio, so external AI assistants can call a rago
//! deployment's registered tools directly.

mod protocol;
mod server;

pub use server::{start_server, McpServer};
