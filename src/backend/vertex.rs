//! Vertex AI Memory Bank backend
//!
//! Speaks the Agent Engine REST API (`v1beta1`). Memory writes and generation
//! are long-running operations on the service side; generation operations are
//! handed back to the caller as job ids, while engine creation and memory
//! creation are awaited here because their result is the resource itself.

use super::{ConnectionHandle, MemoryBackend};
use crate::config::BankConfig;
use crate::error::{MemoryBankError, Result};
use crate::types::{
    ConversationTurn, JobProgress, MemoryRecord, MemoryScope, MemoryTopic, NewMemory,
    RetrievalQuery, SearchResult,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Request timeout duration
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Page size used when walking every memory of a scope
const LIST_PAGE_SIZE: usize = 100;

/// Delay between checks of a settling operation
const OPERATION_CHECK_MS: u64 = 1000;

/// Checks granted to a memory-create operation
const CREATE_MEMORY_CHECKS: usize = 20;

/// Checks granted to an engine-create operation
const CREATE_ENGINE_CHECKS: usize = 300;

/// Default base URL for a region
pub fn default_endpoint(location: &str) -> String {
    format!("https://{}-aiplatform.googleapis.com/v1beta1", location)
}

/// Vertex AI Memory Bank client
pub struct VertexMemoryBackend {
    client: Client,
}

/// Memory resource
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMemory {
    name: String,
    #[serde(default)]
    fact: Option<String>,
    #[serde(default)]
    scope: BTreeMap<String, String>,
    #[serde(default)]
    topics: Vec<WireTopic>,
    #[serde(default)]
    create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    expire_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTopic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    managed_memory_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    custom_memory_topic_label: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMemoryRequest<'a> {
    fact: &'a str,
    scope: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    topics: Vec<WireTopic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expire_time: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveRequest<'a> {
    scope: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    similarity_search_params: Option<SimilaritySearchParams<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    simple_retrieval_params: Option<SimpleRetrievalParams>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimilaritySearchParams<'a> {
    search_query: &'a str,
    top_k: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimpleRetrievalParams {
    page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse {
    #[serde(default)]
    retrieved_memories: Vec<RetrievedMemory>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RetrievedMemory {
    memory: WireMemory,
    #[serde(default)]
    distance: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    direct_contents_source: DirectContentsSource,
    scope: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct DirectContentsSource {
    events: Vec<Event>,
}

#[derive(Debug, Serialize)]
struct Event {
    content: Content,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    generated_memories: Vec<GeneratedMemory>,
}

#[derive(Debug, Deserialize)]
struct GeneratedMemory {
    #[serde(default)]
    memory: Option<MemoryRef>,
    #[serde(default)]
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MemoryRef {
    name: String,
}

/// Long-running operation
#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ReasoningEngine {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateEngineRequest {
    display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_spec: Option<Value>,
}

/// API error response
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

impl WireMemory {
    fn into_record(self) -> Result<MemoryRecord> {
        let fact = self
            .fact
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| {
                MemoryBankError::BackendProtocol(format!("memory {} has no fact", self.name))
            })?;

        let scope = MemoryScope::from_map(&self.scope).ok_or_else(|| {
            MemoryBankError::BackendProtocol(format!(
                "memory {} has an unrecognized scope",
                self.name
            ))
        })?;

        let topics = self
            .topics
            .iter()
            .filter_map(|topic| match &topic.managed_memory_topic {
                Some(managed) => match managed.parse::<MemoryTopic>() {
                    Ok(topic) => Some(topic),
                    Err(_) => {
                        debug!("Ignoring unknown managed topic {} on {}", managed, self.name);
                        None
                    }
                },
                None => None,
            })
            .collect::<BTreeSet<_>>();

        Ok(MemoryRecord {
            id: self.name,
            fact,
            scope,
            topics,
            created_at: self.create_time,
            updated_at: self.update_time,
            expire_time: self.expire_time,
        })
    }
}

impl Operation {
    /// Interpret a generation operation
    fn progress(self) -> Result<JobProgress> {
        if !self.done {
            return Ok(JobProgress::Running);
        }

        if let Some(error) = self.error {
            let reason = if error.message.is_empty() {
                "memory service reported an unspecified failure".to_string()
            } else {
                error.message
            };
            return Ok(JobProgress::Failed { reason });
        }

        let memory_ids = match self.response {
            Some(response) => serde_json::from_value::<GenerateResponse>(response)
                .map_err(|e| {
                    MemoryBankError::BackendProtocol(format!(
                        "malformed generation result for {}: {}",
                        self.name, e
                    ))
                })?
                .generated_memories
                .into_iter()
                .filter(|generated| generated.action.as_deref() != Some("DELETED"))
                .filter_map(|generated| generated.memory.map(|m| m.name))
                .collect(),
            None => Vec::new(),
        };

        Ok(JobProgress::Completed { memory_ids })
    }
}

/// Relevance from a backend distance; smaller distances rank higher
pub fn relevance_from_distance(distance: Option<f64>) -> f32 {
    match distance {
        Some(d) if d.is_finite() => (1.0 / (1.0 + d.max(0.0))) as f32,
        _ => 0.0,
    }
}

/// Decoded reply of a request that may address a missing resource
enum Reply<T> {
    Found(T),
    Missing(String),
}

fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .map(|e| e.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string())
}

/// Map a non-success HTTP status to the error vocabulary. A 404 only means
/// "memory not found" where the caller addressed a memory, so callers that
/// care use [`VertexMemoryBackend::fetch`]; here it is a protocol error.
fn status_error(status: StatusCode, body: &str) -> MemoryBankError {
    let message = error_message(status, body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            MemoryBankError::BackendUnavailable(format!("authentication rejected ({}): {}", status.as_u16(), message))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            MemoryBankError::BackendUnavailable(format!("{}: {}", status.as_u16(), message))
        }
        s if s.is_server_error() => {
            MemoryBankError::BackendUnavailable(format!("{}: {}", status.as_u16(), message))
        }
        _ => MemoryBankError::BackendProtocol(format!("{}: {}", status.as_u16(), message)),
    }
}

/// Full resource name for a caller-supplied memory id, or `None` when the id
/// cannot belong to this engine
fn memory_resource(engine_name: &str, memory_id: &str) -> Option<String> {
    let prefix = format!("{}/memories/", engine_name);
    if let Some(short) = memory_id.strip_prefix(&prefix) {
        return (!short.is_empty() && !short.contains('/')).then(|| memory_id.to_string());
    }
    if memory_id.contains('/') {
        return None;
    }
    Some(format!("{}{}", prefix, memory_id))
}

fn to_events(conversation: &[ConversationTurn]) -> Vec<Event> {
    conversation
        .iter()
        .map(|turn| Event {
            content: Content {
                role: turn.role.as_str().to_string(),
                parts: vec![Part {
                    text: turn.content.clone(),
                }],
            },
        })
        .collect()
}

fn engine_context_spec(topics: &BTreeSet<MemoryTopic>) -> Option<Value> {
    if topics.is_empty() {
        return None;
    }
    let memory_topics: Vec<Value> = topics
        .iter()
        .map(|t| serde_json::json!({"managedMemoryTopic": {"managedTopicEnum": t.as_str()}}))
        .collect();
    Some(serde_json::json!({
        "memoryBankConfig": {
            "customizationConfigs": [{"memoryTopics": memory_topics}]
        }
    }))
}

impl VertexMemoryBackend {
    /// Create a backend with its own HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| MemoryBankError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    /// Use a preconfigured HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn request(
        &self,
        method: Method,
        endpoint: &str,
        path: &str,
        credential: &SecretString,
    ) -> RequestBuilder {
        let url = format!("{}/{}", endpoint.trim_end_matches('/'), path);
        let builder = self.client.request(method, url);
        let secret = credential.expose_secret();
        if secret.starts_with("AIza") {
            builder.header("x-goog-api-key", secret)
        } else {
            builder.bearer_auth(secret)
        }
    }

    /// Send once and decode the JSON body; any 404 is a protocol error
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        match self.fetch(request).await? {
            Reply::Found(value) => Ok(value),
            Reply::Missing(message) => Err(MemoryBankError::BackendProtocol(format!(
                "resource not found: {}",
                message
            ))),
        }
    }

    /// Send once, reporting a 404 as [`Reply::Missing`]
    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Reply<T>> {
        let response = request.send().await.map_err(|e| {
            MemoryBankError::BackendUnavailable(e.without_url().to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MemoryBankError::BackendUnavailable(e.without_url().to_string()))?;

        if status == StatusCode::NOT_FOUND {
            return Ok(Reply::Missing(error_message(status, &body)));
        }
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body)
            .map(Reply::Found)
            .map_err(|e| MemoryBankError::BackendProtocol(format!("undecodable response: {}", e)))
    }

    /// Check an operation until it is done or `checks` run out
    async fn settle(
        &self,
        endpoint: &str,
        credential: &SecretString,
        mut operation: Operation,
        checks: usize,
    ) -> Result<Operation> {
        for _ in 0..checks {
            if operation.done {
                return Ok(operation);
            }
            sleep(Duration::from_millis(OPERATION_CHECK_MS)).await;
            operation = self
                .send(self.request(Method::GET, endpoint, &operation.name, credential))
                .await?;
        }
        if operation.done {
            return Ok(operation);
        }
        Err(MemoryBankError::BackendProtocol(format!(
            "operation {} still running after {} checks; the write may still complete, check for it before retrying",
            operation.name, checks
        )))
    }

    /// Resolve an operation that should carry a resource in its response
    async fn settled_response(
        &self,
        endpoint: &str,
        credential: &SecretString,
        operation: Operation,
        checks: usize,
    ) -> Result<Value> {
        let operation = self.settle(endpoint, credential, operation, checks).await?;
        if let Some(error) = operation.error {
            return Err(MemoryBankError::BackendUnavailable(error.message));
        }
        operation.response.ok_or_else(|| {
            MemoryBankError::BackendProtocol(format!(
                "operation {} finished without a result",
                operation.name
            ))
        })
    }

    async fn retrieve(
        &self,
        handle: &ConnectionHandle,
        request: &RetrieveRequest<'_>,
    ) -> Result<RetrieveResponse> {
        let path = format!("{}/memories:retrieve", handle.engine_name);
        self.send(
            self.request(Method::POST, &handle.endpoint, &path, handle.credential())
                .json(request),
        )
        .await
    }
}

#[async_trait]
impl MemoryBackend for VertexMemoryBackend {
    async fn connect(
        &self,
        config: &BankConfig,
        credential: SecretString,
    ) -> Result<ConnectionHandle> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| default_endpoint(&config.location));

        let engine_name = match &config.agent_engine_name {
            Some(name) => {
                let engine: ReasoningEngine = match self
                    .fetch(self.request(Method::GET, &endpoint, name, &credential))
                    .await?
                {
                    Reply::Found(engine) => engine,
                    Reply::Missing(_) => {
                        return Err(MemoryBankError::Configuration(format!(
                            "agent engine {} does not exist",
                            name
                        )))
                    }
                };
                info!("Using existing agent engine: {}", engine.name);
                engine.name
            }
            None => {
                let path = format!(
                    "projects/{}/locations/{}/reasoningEngines",
                    config.project_id, config.location
                );
                let request = CreateEngineRequest {
                    display_name: "memory-bank-mcp".to_string(),
                    context_spec: engine_context_spec(&config.memory_topics),
                };
                let operation: Operation = self
                    .send(
                        self.request(Method::POST, &endpoint, &path, &credential)
                            .json(&request),
                    )
                    .await?;
                let response = self
                    .settled_response(&endpoint, &credential, operation, CREATE_ENGINE_CHECKS)
                    .await?;
                let engine: ReasoningEngine = serde_json::from_value(response).map_err(|e| {
                    MemoryBankError::BackendProtocol(format!("malformed engine: {}", e))
                })?;
                info!("Created new agent engine: {}", engine.name);
                engine.name
            }
        };

        Ok(ConnectionHandle::new(engine_name, config, endpoint, credential))
    }

    async fn create_memory(
        &self,
        handle: &ConnectionHandle,
        memory: &NewMemory,
    ) -> Result<MemoryRecord> {
        let request = CreateMemoryRequest {
            fact: &memory.fact,
            scope: memory.scope.to_map(),
            topics: memory
                .topics
                .iter()
                .map(|t| WireTopic {
                    managed_memory_topic: Some(t.as_str().to_string()),
                    custom_memory_topic_label: None,
                })
                .collect(),
            expire_time: memory
                .expire_time
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        };

        let path = format!("{}/memories", handle.engine_name);
        let operation: Operation = self
            .send(
                self.request(Method::POST, &handle.endpoint, &path, handle.credential())
                    .json(&request),
            )
            .await?;
        let response = self
            .settled_response(
                &handle.endpoint,
                handle.credential(),
                operation,
                CREATE_MEMORY_CHECKS,
            )
            .await?;

        let wire: WireMemory = serde_json::from_value(response)
            .map_err(|e| MemoryBankError::BackendProtocol(format!("malformed memory: {}", e)))?;
        wire.into_record()
    }

    async fn list_memories(
        &self,
        handle: &ConnectionHandle,
        scope: &MemoryScope,
    ) -> Result<Vec<MemoryRecord>> {
        let mut memories = Vec::new();
        let mut page_token = None;

        loop {
            let request = RetrieveRequest {
                scope: scope.to_map(),
                similarity_search_params: None,
                simple_retrieval_params: Some(SimpleRetrievalParams {
                    page_size: LIST_PAGE_SIZE,
                    page_token: page_token.take(),
                }),
            };
            let page = self.retrieve(handle, &request).await?;

            for retrieved in page.retrieved_memories {
                memories.push(retrieved.memory.into_record()?);
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Listed {} memories for {}", memories.len(), scope);
        Ok(memories)
    }

    async fn delete_memory(
        &self,
        handle: &ConnectionHandle,
        scope: &MemoryScope,
        memory_id: &str,
    ) -> Result<()> {
        let not_found = || MemoryBankError::MemoryNotFound(memory_id.to_string());
        let name = memory_resource(&handle.engine_name, memory_id).ok_or_else(not_found)?;

        let existing: WireMemory = match self
            .fetch(self.request(Method::GET, &handle.endpoint, &name, handle.credential()))
            .await?
        {
            Reply::Found(memory) => memory,
            Reply::Missing(_) => return Err(not_found()),
        };

        if MemoryScope::from_map(&existing.scope).as_ref() != Some(scope) {
            debug!("Memory {} is outside {}, reporting not found", name, scope);
            return Err(not_found());
        }

        match self
            .fetch::<Value>(self.request(Method::DELETE, &handle.endpoint, &name, handle.credential()))
            .await?
        {
            Reply::Found(_) => Ok(()),
            Reply::Missing(_) => Err(not_found()),
        }
    }

    async fn search_memories(
        &self,
        handle: &ConnectionHandle,
        query: &RetrievalQuery,
    ) -> Result<Vec<SearchResult>> {
        let request = RetrieveRequest {
            scope: query.scope.to_map(),
            similarity_search_params: Some(SimilaritySearchParams {
                search_query: &query.search_query,
                top_k: query.top_k,
            }),
            simple_retrieval_params: None,
        };

        let response = self.retrieve(handle, &request).await?;
        response
            .retrieved_memories
            .into_iter()
            .map(|retrieved| {
                let score = relevance_from_distance(retrieved.distance);
                retrieved
                    .memory
                    .into_record()
                    .map(|memory| SearchResult { memory, score })
            })
            .collect()
    }

    async fn start_generation(
        &self,
        handle: &ConnectionHandle,
        scope: &MemoryScope,
        conversation: &[ConversationTurn],
    ) -> Result<String> {
        let request = GenerateRequest {
            direct_contents_source: DirectContentsSource {
                events: to_events(conversation),
            },
            scope: scope.to_map(),
        };

        let path = format!("{}/memories:generate", handle.engine_name);
        let operation: Operation = self
            .send(
                self.request(Method::POST, &handle.endpoint, &path, handle.credential())
                    .json(&request),
            )
            .await?;

        if operation.name.is_empty() {
            return Err(MemoryBankError::BackendProtocol(
                "generation operation has no name".to_string(),
            ));
        }
        Ok(operation.name)
    }

    async fn poll_generation(
        &self,
        handle: &ConnectionHandle,
        job_id: &str,
    ) -> Result<JobProgress> {
        if !job_id.starts_with(&format!("{}/", handle.engine_name)) {
            warn!("Refusing to poll a job outside the connected engine");
            return Err(MemoryBankError::InvalidArgument(format!(
                "unknown generation job: {}",
                job_id
            )));
        }

        match self
            .fetch::<Operation>(self.request(Method::GET, &handle.endpoint, job_id, handle.credential()))
            .await?
        {
            Reply::Found(operation) => operation.progress(),
            Reply::Missing(message) => Err(MemoryBankError::BackendProtocol(format!(
                "generation job vanished: {}",
                message
            ))),
        }
    }
}
