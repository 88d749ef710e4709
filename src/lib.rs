//! Memory Bank MCP - long-term memory tools for AI agents
//!
//! Exposes a hosted Memory Bank (Vertex AI Agent Engine) to MCP clients as a
//! small set of tools: initialize a connection, generate memories from a
//! conversation, retrieve or list them by scope, create and delete single
//! memories.
//!
//! # Architecture
//!
//! - **Types / Validation / Format**: data model, argument checks, result payloads
//! - **Backend**: the memory service RPC surface and its Vertex implementation
//! - **Client**: scope isolation, ranking and job tracking over a backend
//! - **State**: the process-wide connection, established once
//! - **MCP**: JSON-RPC server, tool dispatch and prompts
//!
//! # Example
//!
//! ```ignore
//! use memory_bank::{
//!     AppState, BankConfig, MemoryClient, McpServer, ToolHandler, VertexMemoryBackend,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = MemoryClient::new(Arc::new(VertexMemoryBackend::new()?));
//!     let state = Arc::new(AppState::new(client.clone()));
//!     let handler = ToolHandler::new(state, client, Default::default(), BankConfig::from_env());
//!     McpServer::new(handler).run().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod format;
pub mod mcp;
pub mod poll;
pub mod state;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use backend::{ConnectionHandle, ConnectionSummary, MemoryBackend, VertexMemoryBackend};
pub use client::MemoryClient;
pub use config::{BankConfig, CredentialsRef, PollPolicy, ServerSettings};
pub use error::{MemoryBankError, Result};
pub use mcp::{McpServer, ToolHandler, ToolName};
pub use state::{AppState, Initialized};
pub use types::{
    ConversationTurn, GenerationJob, JobProgress, JobStatus, MemoryRecord, MemoryScope,
    MemoryTopic, NewMemory, RetrievalQuery, Role, SearchResult,
};
