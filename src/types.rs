//! Core data types for the memory bank tool server
//!
//! Records and jobs are owned by the hosted memory service. The types here are
//! snapshots of what the service reported plus the scope and topic vocabulary
//! used to address them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Isolation boundary for every memory operation
///
/// Two scopes are equal only when both fields match exactly. A scope without a
/// context id is its own scope, not a wildcard over every context of the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryScope {
    /// Owner of the memories
    pub user_id: String,

    /// Optional narrower context (session, app, agent, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl MemoryScope {
    /// Scope for a user with no context id
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            context_id: None,
        }
    }

    /// Narrow this scope to a context
    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    /// String map form used on the wire
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("user_id".to_string(), self.user_id.clone());
        if let Some(context_id) = &self.context_id {
            map.insert("context_id".to_string(), context_id.clone());
        }
        map
    }

    /// Rebuild a scope from its wire map. Returns `None` when `user_id` is
    /// absent or the map carries keys this server never writes.
    pub fn from_map(map: &BTreeMap<String, String>) -> Option<Self> {
        let user_id = map.get("user_id")?.clone();
        let context_id = map.get("context_id").cloned();
        let known = 1 + usize::from(context_id.is_some());
        if map.len() != known {
            return None;
        }
        Some(Self {
            user_id,
            context_id,
        })
    }
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.context_id {
            Some(context_id) => write!(f, "user:{}/context:{}", self.user_id, context_id),
            None => write!(f, "user:{}", self.user_id),
        }
    }
}

/// Managed memory topics understood by the memory service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryTopic {
    /// Preferences and settings the user expressed
    UserPreferences,

    /// Personal information (names, relationships, dates)
    UserPersonalInfo,

    /// Important events and outcomes of a conversation
    KeyConversationDetails,

    /// Explicit "remember this" / "forget that" requests
    ExplicitInstructions,
}

impl MemoryTopic {
    /// Every known topic, in enumeration order
    pub const ALL: [MemoryTopic; 4] = [
        MemoryTopic::UserPreferences,
        MemoryTopic::UserPersonalInfo,
        MemoryTopic::KeyConversationDetails,
        MemoryTopic::ExplicitInstructions,
    ];

    /// Wire name of the topic
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTopic::UserPreferences => "USER_PREFERENCES",
            MemoryTopic::UserPersonalInfo => "USER_PERSONAL_INFO",
            MemoryTopic::KeyConversationDetails => "KEY_CONVERSATION_DETAILS",
            MemoryTopic::ExplicitInstructions => "EXPLICIT_INSTRUCTIONS",
        }
    }
}

impl FromStr for MemoryTopic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemoryTopic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl std::fmt::Display for MemoryTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single memory as reported by the memory service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Opaque backend identifier (resource name)
    pub id: String,

    /// The remembered fact
    pub fact: String,

    /// Scope the memory belongs to
    pub scope: MemoryScope,

    /// Topics, empty when uncategorized
    #[serde(default)]
    pub topics: BTreeSet<MemoryTopic>,

    /// Creation time, if the service reported one
    pub created_at: Option<DateTime<Utc>>,

    /// Last update time, if the service reported one
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    /// Expiry time for memories created with a TTL
    #[serde(default)]
    pub expire_time: Option<DateTime<Utc>>,
}

/// Memory paired with its backend-computed relevance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matched memory
    pub memory: MemoryRecord,

    /// Relevance score, higher is more relevant
    pub score: f32,
}

/// Request to create a memory directly
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemory {
    /// Trimmed fact text
    pub fact: String,

    /// Target scope
    pub scope: MemoryScope,

    /// Topics to attach
    pub topics: BTreeSet<MemoryTopic>,

    /// Optional absolute expiry
    pub expire_time: Option<DateTime<Utc>>,
}

/// Ephemeral similarity search request
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    /// Scope to search within
    pub scope: MemoryScope,

    /// Natural-language query
    pub search_query: String,

    /// Maximum number of results, already clamped
    pub top_k: usize,
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(other.to_string()),
        }
    }
}

/// One validated conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// Generation job status as observed by polling
///
/// `PENDING -> RUNNING -> {COMPLETED, FAILED}`; terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asynchronous memory extraction job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    /// Opaque job identifier (operation name)
    pub id: String,

    /// Scope the generated memories land in
    pub scope: MemoryScope,

    /// Conversation submitted for extraction
    pub conversation: Vec<ConversationTurn>,

    /// Topics the caller asked for, empty for all
    #[serde(default)]
    pub topics: BTreeSet<MemoryTopic>,

    /// Last observed status
    pub status: JobStatus,

    /// Memory ids produced by a completed job, in backend order
    #[serde(default)]
    pub result_memory_ids: Vec<String>,

    /// Backend-reported reason for a failed job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// What a single poll of a job reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobProgress {
    /// Accepted but not yet picked up
    Pending,

    /// Still extracting
    Running,

    /// Finished; ids of the memories it produced
    Completed { memory_ids: Vec<String> },

    /// Finished with an error
    Failed { reason: String },
}

impl GenerationJob {
    /// Apply an observed poll result. Terminal jobs ignore further updates.
    pub fn observe(&mut self, progress: JobProgress) {
        if self.status.is_terminal() {
            return;
        }
        match progress {
            JobProgress::Pending => {}
            JobProgress::Running => self.status = JobStatus::Running,
            JobProgress::Completed { memory_ids } => {
                self.status = JobStatus::Completed;
                self.result_memory_ids = memory_ids;
            }
            JobProgress::Failed { reason } => {
                self.status = JobStatus::Failed;
                self.failure_reason = Some(reason);
            }
        }
    }
}
