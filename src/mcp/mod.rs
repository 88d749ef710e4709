//! Model Context Protocol (MCP) server implementation
//!
//! Provides a JSON-RPC 2.0 server over stdio exposing the memory bank tools
//! and prompts.

pub mod prompts;
pub mod protocol;
pub mod server;
pub mod tools;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use server::McpServer;
pub use tools::{Tool, ToolHandler, ToolName};
