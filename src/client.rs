//! Memory service client
//!
//! Sits between the tool handlers and a [`MemoryBackend`]. It builds backend
//! requests from validated arguments and holds the backend to the guarantees
//! the tools promise: results never cross scopes, searches are ranked and
//! bounded, and job observations only ever move forward.

use crate::backend::{ConnectionHandle, MemoryBackend};
use crate::config::BankConfig;
use crate::error::{MemoryBankError, Result};
use crate::types::{
    ConversationTurn, GenerationJob, JobStatus, MemoryRecord, MemoryScope, MemoryTopic, NewMemory,
    RetrievalQuery, SearchResult,
};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Façade over the memory service RPCs
#[derive(Clone)]
pub struct MemoryClient {
    backend: Arc<dyn MemoryBackend>,
}

impl MemoryClient {
    /// Wrap a backend
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }

    /// Establish a connection
    pub async fn connect(
        &self,
        config: &BankConfig,
        credential: SecretString,
    ) -> Result<ConnectionHandle> {
        debug!(
            "Connecting to memory service for project {} in {}",
            config.project_id, config.location
        );
        self.backend.connect(config, credential).await
    }

    /// Create a memory under `scope`
    pub async fn create_memory(
        &self,
        handle: &ConnectionHandle,
        fact: String,
        scope: MemoryScope,
        topics: BTreeSet<MemoryTopic>,
        expire_time: Option<DateTime<Utc>>,
    ) -> Result<MemoryRecord> {
        let request = NewMemory {
            fact,
            scope,
            topics,
            expire_time,
        };
        let record = self.backend.create_memory(handle, &request).await?;

        if record.scope != request.scope {
            return Err(MemoryBankError::BackendProtocol(format!(
                "created memory {} landed outside the requested scope",
                record.id
            )));
        }

        debug!("Created memory {} for {}", record.id, record.scope);
        Ok(record)
    }

    /// Delete a memory. Fails with `MemoryNotFound` when the id does not
    /// exist under `scope`.
    pub async fn delete_memory(
        &self,
        handle: &ConnectionHandle,
        scope: &MemoryScope,
        memory_id: &str,
    ) -> Result<bool> {
        self.backend.delete_memory(handle, scope, memory_id).await?;
        debug!("Deleted memory {} for {}", memory_id, scope);
        Ok(true)
    }

    /// Memories stored under exactly `scope`, newest first. A non-empty
    /// `topics` filter keeps memories carrying at least one of the topics.
    pub async fn list_memories(
        &self,
        handle: &ConnectionHandle,
        scope: &MemoryScope,
        topics: Option<&BTreeSet<MemoryTopic>>,
    ) -> Result<Vec<MemoryRecord>> {
        let mut memories = in_scope(self.backend.list_memories(handle, scope).await?, scope, |m| {
            &m.scope
        });

        if let Some(topics) = topics.filter(|t| !t.is_empty()) {
            memories.retain(|m| !m.topics.is_disjoint(topics));
        }

        memories.sort_by(|a, b| newest_first(a, b));
        Ok(memories)
    }

    /// Similarity search, at most `top_k` results, most relevant first
    pub async fn search_memories(
        &self,
        handle: &ConnectionHandle,
        query: &RetrievalQuery,
    ) -> Result<Vec<SearchResult>> {
        let results = self.backend.search_memories(handle, query).await?;
        let mut results = in_scope(results, &query.scope, |r| &r.memory.scope);

        results.retain(|r| {
            if r.score.is_nan() {
                warn!("Dropping result {} with NaN relevance", r.memory.id);
                return false;
            }
            true
        });
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(query.top_k);
        Ok(results)
    }

    /// Start a generation job; the returned job is PENDING
    pub async fn start_generation(
        &self,
        handle: &ConnectionHandle,
        scope: MemoryScope,
        conversation: Vec<ConversationTurn>,
        topics: BTreeSet<MemoryTopic>,
    ) -> Result<GenerationJob> {
        let id = self
            .backend
            .start_generation(handle, &scope, &conversation)
            .await?;

        debug!("Started generation job {} for {}", id, scope);
        Ok(GenerationJob {
            id,
            scope,
            conversation,
            topics,
            status: JobStatus::Pending,
            result_memory_ids: Vec::new(),
            failure_reason: None,
        })
    }

    /// Observe the job once more. Terminal jobs are returned unchanged
    /// without contacting the backend.
    pub async fn poll_generation(
        &self,
        handle: &ConnectionHandle,
        job: &GenerationJob,
    ) -> Result<GenerationJob> {
        let mut job = job.clone();
        if job.status.is_terminal() {
            return Ok(job);
        }

        let progress = self.backend.poll_generation(handle, &job.id).await?;
        job.observe(progress);
        debug!("Generation job {} is {}", job.id, job.status);
        Ok(job)
    }

    /// Fetch the memories a completed job produced, in job order. Ids that no
    /// longer exist in the job's scope are skipped.
    pub async fn job_memories(
        &self,
        handle: &ConnectionHandle,
        job: &GenerationJob,
    ) -> Result<Vec<MemoryRecord>> {
        if job.result_memory_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut available = self.list_memories(handle, &job.scope, None).await?;
        let records = job
            .result_memory_ids
            .iter()
            .filter_map(|id| {
                let pos = available.iter().position(|m| &m.id == id)?;
                Some(available.swap_remove(pos))
            })
            .collect();
        Ok(records)
    }
}

/// Drop anything the backend returned from a foreign scope
fn in_scope<T>(items: Vec<T>, scope: &MemoryScope, scope_of: impl Fn(&T) -> &MemoryScope) -> Vec<T> {
    let total = items.len();
    let kept: Vec<T> = items.into_iter().filter(|item| scope_of(item) == scope).collect();
    if kept.len() != total {
        warn!(
            "Memory service returned {} records outside {}; discarded",
            total - kept.len(),
            scope
        );
    }
    kept
}

fn newest_first(a: &MemoryRecord, b: &MemoryRecord) -> Ordering {
    match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}
