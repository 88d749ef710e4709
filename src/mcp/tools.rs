//! MCP tool implementations
//!
//! Six tools over the hosted memory bank:
//! - SETUP: initialize_memory_bank
//! - WRITE: create_memory, generate_memories
//! - READ: retrieve_memories, list_memories
//! - FORGET: delete_memory
//!
//! Every tool except `initialize_memory_bank` requires an established
//! connection and checks for it before looking at its arguments.

use crate::backend::ConnectionHandle;
use crate::client::MemoryClient;
use crate::config::{BankConfig, CredentialsRef, ServerSettings};
use crate::error::{MemoryBankError, Result};
use crate::format;
use crate::poll::Backoff;
use crate::state::AppState;
use crate::types::{GenerationJob, JobStatus, RetrievalQuery};
use crate::validation::{self, RawTurn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Tool schema definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (e.g., "create_memory")
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// The closed set of tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    InitializeMemoryBank,
    GenerateMemories,
    RetrieveMemories,
    CreateMemory,
    DeleteMemory,
    ListMemories,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::InitializeMemoryBank,
        ToolName::GenerateMemories,
        ToolName::RetrieveMemories,
        ToolName::CreateMemory,
        ToolName::DeleteMemory,
        ToolName::ListMemories,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::InitializeMemoryBank => "initialize_memory_bank",
            ToolName::GenerateMemories => "generate_memories",
            ToolName::RetrieveMemories => "retrieve_memories",
            ToolName::CreateMemory => "create_memory",
            ToolName::DeleteMemory => "delete_memory",
            ToolName::ListMemories => "list_memories",
        }
    }

    /// Whether the tool needs an established connection
    pub fn requires_initialization(&self) -> bool {
        !matches!(self, ToolName::InitializeMemoryBank)
    }
}

impl FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct InitializeParams {
    #[serde(default, alias = "project")]
    project_id: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    credentials_ref: Option<String>,
    #[serde(default)]
    agent_engine_name: Option<String>,
    #[serde(default)]
    memory_topics: Vec<String>,
    #[serde(default)]
    reinitialize: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateParams {
    #[serde(default)]
    conversation: Vec<RawTurn>,
    #[serde(default)]
    scope: Value,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    wait_for_completion: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RetrieveParams {
    #[serde(default)]
    scope: Value,
    #[serde(default)]
    search_query: Option<String>,
    #[serde(default)]
    top_k: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    #[serde(default)]
    fact: String,
    #[serde(default)]
    scope: Value,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    ttl_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    #[serde(default)]
    scope: Value,
    #[serde(default, alias = "memory_name")]
    memory_id: String,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    scope: Value,
    #[serde(default)]
    topics: Option<Vec<String>>,
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| MemoryBankError::InvalidArgument(e.to_string()))
}

fn scope_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "description": "Whose memories: {\"user_id\": \"alice123\"}, optionally with \"context_id\"",
        "properties": {
            "user_id": {"type": "string"},
            "context_id": {"type": "string"}
        },
        "required": ["user_id"]
    })
}

fn topics_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "array",
        "items": {
            "type": "string",
            "enum": ["USER_PREFERENCES", "USER_PERSONAL_INFO", "KEY_CONVERSATION_DETAILS", "EXPLICIT_INSTRUCTIONS"]
        },
        "description": description
    })
}

/// Tool handler that dispatches to appropriate implementation
pub struct ToolHandler {
    state: Arc<AppState>,
    client: MemoryClient,
    settings: ServerSettings,
    defaults: BankConfig,
}

impl ToolHandler {
    /// Create a new tool handler. `defaults` fills in whatever
    /// `initialize_memory_bank` callers leave out.
    pub fn new(
        state: Arc<AppState>,
        client: MemoryClient,
        settings: ServerSettings,
        defaults: BankConfig,
    ) -> Self {
        Self {
            state,
            client,
            settings,
            defaults,
        }
    }

    /// Shared application state
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Get list of all available tools
    pub fn list_tools(&self) -> Vec<Tool> {
        ToolName::ALL.into_iter().map(|tool| self.describe(tool)).collect()
    }

    fn describe(&self, tool: ToolName) -> Tool {
        let (description, input_schema) = match tool {
            ToolName::InitializeMemoryBank => (
                "Connect to a Memory Bank in your Google Cloud project. Call this first; later calls reuse the connection unless reinitialize is true.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "project_id": {"type": "string", "description": "Google Cloud project ID"},
                        "location": {"type": "string", "description": "Google Cloud location", "default": "us-central1"},
                        "credentials_ref": {"type": "string", "description": "Name of the environment variable holding the access token or API key"},
                        "agent_engine_name": {"type": "string", "description": "Existing Agent Engine resource name to reuse"},
                        "memory_topics": topics_schema("Topics a newly created engine should extract"),
                        "reinitialize": {"type": "boolean", "description": "Drop the current connection and connect again", "default": false}
                    }
                }),
            ),
            ToolName::GenerateMemories => (
                "Extract memories from a conversation. Returns the job immediately, or waits for it when wait_for_completion is true.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "conversation": {
                            "type": "array",
                            "description": "Ordered turns",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "role": {"type": "string", "enum": ["user", "assistant", "system"]},
                                    "content": {"type": "string"}
                                },
                                "required": ["role", "content"]
                            }
                        },
                        "scope": scope_schema(),
                        "topics": topics_schema("Only report generated memories with these topics"),
                        "wait_for_completion": {"type": "boolean", "default": false}
                    },
                    "required": ["conversation", "scope"]
                }),
            ),
            ToolName::RetrieveMemories => (
                "Search a user's memories by similarity to a query. Without a query, returns the user's memories unranked.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "scope": scope_schema(),
                        "search_query": {"type": "string", "description": "What to look for"},
                        "top_k": {
                            "type": "integer",
                            "description": format!("Maximum results (capped at {})", self.settings.max_top_k),
                            "default": self.settings.default_top_k
                        }
                    },
                    "required": ["scope"]
                }),
            ),
            ToolName::CreateMemory => (
                "Store a single fact as a memory.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "fact": {"type": "string", "description": "The information to remember"},
                        "scope": scope_schema(),
                        "topics": topics_schema("Topics to attach"),
                        "ttl_seconds": {"type": "integer", "description": "Optional time-to-live in seconds"}
                    },
                    "required": ["fact", "scope"]
                }),
            ),
            ToolName::DeleteMemory => (
                "Delete one memory from a scope. Reports not_found when the scope holds no such memory.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "scope": scope_schema(),
                        "memory_id": {"type": "string", "description": "Memory id as returned by other tools"}
                    },
                    "required": ["scope", "memory_id"]
                }),
            ),
            ToolName::ListMemories => (
                "List every memory in a scope, newest first, optionally filtered by topic.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "scope": scope_schema(),
                        "topics": topics_schema("Keep memories carrying any of these topics")
                    },
                    "required": ["scope"]
                }),
            ),
        };

        Tool {
            name: tool.as_str().to_string(),
            description: description.to_string(),
            input_schema,
        }
    }

    /// Execute a tool call
    pub async fn execute(&self, tool: ToolName, params: Value) -> Result<Value> {
        debug!("Executing tool: {}", tool);

        match tool {
            ToolName::InitializeMemoryBank => self.initialize_memory_bank(params).await,
            ToolName::GenerateMemories => self.generate_memories(params).await,
            ToolName::RetrieveMemories => self.retrieve_memories(params).await,
            ToolName::CreateMemory => self.create_memory(params).await,
            ToolName::DeleteMemory => self.delete_memory(params).await,
            ToolName::ListMemories => self.list_memories(params).await,
        }
    }

    // === SETUP ===

    async fn initialize_memory_bank(&self, params: Value) -> Result<Value> {
        let params: InitializeParams = parse_params(params)?;
        let memory_topics = if params.memory_topics.is_empty() {
            self.defaults.memory_topics.clone()
        } else {
            validation::validate_topics(&params.memory_topics)?
        };

        let config = BankConfig {
            project_id: params
                .project_id
                .map(|p| p.trim().to_string())
                .unwrap_or_else(|| self.defaults.project_id.clone()),
            location: params
                .location
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| self.defaults.location.clone()),
            agent_engine_name: params
                .agent_engine_name
                .or_else(|| self.defaults.agent_engine_name.clone()),
            memory_topics,
            credentials: params
                .credentials_ref
                .map(CredentialsRef::env)
                .unwrap_or_else(|| self.defaults.credentials.clone()),
            endpoint: self.defaults.endpoint.clone(),
        };

        info!("Initializing Memory Bank for project {}", config.project_id);
        let outcome = if params.reinitialize {
            self.state.reinitialize(&config).await?
        } else {
            self.state.initialize(&config).await?
        };

        Ok(format::format_initialized(
            &outcome.handle.summary(),
            !outcome.newly_established,
        ))
    }

    // === WRITE ===

    async fn create_memory(&self, params: Value) -> Result<Value> {
        let handle = self.state.require_initialized()?;
        let params: CreateParams = parse_params(params)?;

        let fact = validation::validate_fact(&params.fact, self.settings.max_fact_len)?;
        let scope = validation::validate_scope(&params.scope)?;
        let topics = validation::validate_topics(&params.topics)?;
        let expire_time = validation::validate_ttl(params.ttl_seconds, chrono::Utc::now())?;

        let memory = self
            .client
            .create_memory(&handle, fact, scope, topics, expire_time)
            .await?;

        info!("Created memory for {}", memory.scope);
        Ok(format::format_created(&memory))
    }

    async fn generate_memories(&self, params: Value) -> Result<Value> {
        let handle = self.state.require_initialized()?;
        let params: GenerateParams = parse_params(params)?;

        let scope = validation::validate_scope(&params.scope)?;
        let conversation = validation::validate_conversation(&params.conversation)?;
        let topics = validation::validate_topics(&params.topics)?;
        let wait = validation::wait_for_completion(params.wait_for_completion);

        let job = self
            .client
            .start_generation(&handle, scope, conversation, topics)
            .await?;
        info!("Started memory generation {} for {}", job.id, job.scope);

        if !wait {
            return Ok(format::format_job(&job, None));
        }

        let job = self.wait_for_job(&handle, job).await?;
        match job.status {
            JobStatus::Failed => Err(MemoryBankError::GenerationFailed(
                job.failure_reason
                    .unwrap_or_else(|| "no reason reported".to_string()),
            )),
            JobStatus::Completed => {
                let mut memories = self.client.job_memories(&handle, &job).await?;
                if !job.topics.is_empty() {
                    memories.retain(|m| !m.topics.is_disjoint(&job.topics));
                }
                info!(
                    "Generation {} completed with {} memories",
                    job.id,
                    memories.len()
                );
                Ok(format::format_job(&job, Some(&memories)))
            }
            JobStatus::Pending | JobStatus::Running => {
                info!("Generation {} still {} after wait", job.id, job.status);
                Ok(format::format_job(&job, None))
            }
        }
    }

    /// Poll with growing delays until the job is terminal or the policy's
    /// timeout elapses; on timeout the last observed job is returned
    async fn wait_for_job(
        &self,
        handle: &ConnectionHandle,
        mut job: GenerationJob,
    ) -> Result<GenerationJob> {
        let policy = &self.settings.poll;
        let deadline = Instant::now() + policy.timeout;
        let mut delays = Backoff::new(policy);

        while !job.status.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let delay = delays.next().unwrap_or(policy.max_interval);
            sleep(delay.min(deadline - now)).await;

            match timeout_at(deadline, self.client.poll_generation(handle, &job)).await {
                Ok(Ok(observed)) => job = observed,
                Ok(Err(e)) => {
                    warn!("Polling generation {} failed: {}", job.id, e);
                    return Err(e);
                }
                Err(_) => {
                    debug!("Poll of {} cut off by the wait deadline", job.id);
                    break;
                }
            }
        }

        Ok(job)
    }

    // === READ ===

    async fn retrieve_memories(&self, params: Value) -> Result<Value> {
        let handle = self.state.require_initialized()?;
        let params: RetrieveParams = parse_params(params)?;

        let scope = validation::validate_scope(&params.scope)?;
        let top_k = validation::validate_top_k(
            params.top_k,
            self.settings.default_top_k,
            self.settings.max_top_k,
        )?;

        match params.search_query {
            Some(query) => {
                let query = RetrievalQuery {
                    scope,
                    search_query: validation::validate_text("search_query", &query)?,
                    top_k,
                };
                let results = self.client.search_memories(&handle, &query).await?;
                info!(
                    "Searched memories for {}: {} results",
                    query.scope,
                    results.len()
                );
                Ok(format::format_search_results(
                    &query.scope,
                    &query.search_query,
                    &results,
                ))
            }
            None => {
                let mut memories = self.client.list_memories(&handle, &scope, None).await?;
                memories.truncate(top_k);
                info!("Retrieved {} memories for {}", memories.len(), scope);
                Ok(format::format_memory_list(&scope, None, &memories))
            }
        }
    }

    async fn list_memories(&self, params: Value) -> Result<Value> {
        let handle = self.state.require_initialized()?;
        let params: ListParams = parse_params(params)?;

        let scope = validation::validate_scope(&params.scope)?;
        let topics = params
            .topics
            .as_deref()
            .map(validation::validate_topics)
            .transpose()?;

        let memories = self
            .client
            .list_memories(&handle, &scope, topics.as_ref())
            .await?;

        info!("Listed {} memories for {}", memories.len(), scope);
        Ok(format::format_memory_list(&scope, topics.as_ref(), &memories))
    }

    // === FORGET ===

    async fn delete_memory(&self, params: Value) -> Result<Value> {
        let handle = self.state.require_initialized()?;
        let params: DeleteParams = parse_params(params)?;

        let scope = validation::validate_scope(&params.scope)?;
        let memory_id = validation::validate_memory_id(&params.memory_id)?;

        match self.client.delete_memory(&handle, &scope, &memory_id).await {
            Ok(_) => {
                info!("Deleted memory {} for {}", memory_id, scope);
                Ok(format::format_deleted(&memory_id))
            }
            Err(MemoryBankError::MemoryNotFound(_)) => {
                debug!("Memory {} not found in {}", memory_id, scope);
                Ok(format::format_not_found(&memory_id, &scope))
            }
            Err(e) => Err(e),
        }
    }
}
