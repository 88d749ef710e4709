//! Hosted memory service capability
//!
//! `MemoryBackend` is the raw RPC surface of the memory service: one method per
//! remote operation, no retries, no result shaping. The production
//! implementation talks to Vertex AI Memory Bank over HTTPS.

pub mod vertex;

use crate::config::BankConfig;
use crate::error::Result;
use crate::types::{
    ConversationTurn, JobProgress, MemoryRecord, MemoryScope, NewMemory, RetrievalQuery,
    SearchResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;

pub use vertex::VertexMemoryBackend;

/// Live session with one memory bank engine
///
/// Created once per process by a successful connect and shared read-only by
/// every tool invocation afterwards.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Engine resource name hosting the memory bank
    pub engine_name: String,

    /// Google Cloud project id
    pub project_id: String,

    /// Region of the engine
    pub location: String,

    /// Base URL requests are sent to
    pub endpoint: String,

    /// When the connection was established
    pub established_at: DateTime<Utc>,

    credential: SecretString,
}

impl ConnectionHandle {
    /// Create a handle for an engine that has been resolved or created
    pub fn new(
        engine_name: impl Into<String>,
        config: &BankConfig,
        endpoint: impl Into<String>,
        credential: SecretString,
    ) -> Self {
        Self {
            engine_name: engine_name.into(),
            project_id: config.project_id.clone(),
            location: config.location.clone(),
            endpoint: endpoint.into(),
            established_at: Utc::now(),
            credential,
        }
    }

    /// Credential used to authenticate requests
    pub fn credential(&self) -> &SecretString {
        &self.credential
    }

    /// Public view of the connection, safe to return to callers
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            agent_engine_name: self.engine_name.clone(),
            project_id: self.project_id.clone(),
            location: self.location.clone(),
            established_at: self.established_at,
        }
    }

    /// Whether this connection serves the given project and region
    pub fn matches(&self, config: &BankConfig) -> bool {
        self.project_id == config.project_id
            && self.location == config.location
            && config
                .agent_engine_name
                .as_deref()
                .map_or(true, |name| name == self.engine_name)
    }
}

/// Connection details reported by `initialize_memory_bank`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSummary {
    pub agent_engine_name: String,
    pub project_id: String,
    pub location: String,
    pub established_at: DateTime<Utc>,
}

/// Remote operations of the memory service
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Reach and authenticate against the service, reusing the configured
    /// engine or creating a new one
    async fn connect(&self, config: &BankConfig, credential: SecretString)
        -> Result<ConnectionHandle>;

    /// Store a memory
    async fn create_memory(
        &self,
        handle: &ConnectionHandle,
        memory: &NewMemory,
    ) -> Result<MemoryRecord>;

    /// Every memory stored under exactly this scope
    async fn list_memories(
        &self,
        handle: &ConnectionHandle,
        scope: &MemoryScope,
    ) -> Result<Vec<MemoryRecord>>;

    /// Delete a memory. Ids that do not exist under `scope` are
    /// `MemoryNotFound`, including ids that exist under another scope.
    async fn delete_memory(
        &self,
        handle: &ConnectionHandle,
        scope: &MemoryScope,
        memory_id: &str,
    ) -> Result<()>;

    /// Similarity search within a scope
    async fn search_memories(
        &self,
        handle: &ConnectionHandle,
        query: &RetrievalQuery,
    ) -> Result<Vec<SearchResult>>;

    /// Submit a conversation for memory extraction, returning the job id
    async fn start_generation(
        &self,
        handle: &ConnectionHandle,
        scope: &MemoryScope,
        conversation: &[ConversationTurn],
    ) -> Result<String>;

    /// Observe the current state of a generation job
    async fn poll_generation(&self, handle: &ConnectionHandle, job_id: &str)
        -> Result<JobProgress>;
}
