//! Tool result payloads
//!
//! Turns records, jobs and errors into the JSON objects returned to the
//! calling model. Absent optional fields render as `null`; nothing here fails.

use crate::backend::ConnectionSummary;
use crate::error::MemoryBankError;
use crate::types::{GenerationJob, MemoryRecord, MemoryScope, MemoryTopic, SearchResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

fn timestamp(time: Option<DateTime<Utc>>) -> Value {
    time.map(|t| Value::String(t.to_rfc3339_opts(SecondsFormat::Secs, true)))
        .unwrap_or(Value::Null)
}

fn topics(topics: &BTreeSet<MemoryTopic>) -> Value {
    Value::Array(
        topics
            .iter()
            .map(|t| Value::String(t.as_str().to_string()))
            .collect(),
    )
}

/// Scope as the caller wrote it
pub fn format_scope(scope: &MemoryScope) -> Value {
    json!(scope.to_map())
}

/// One memory
pub fn format_memory(memory: &MemoryRecord) -> Value {
    json!({
        "id": memory.id,
        "fact": memory.fact,
        "scope": format_scope(&memory.scope),
        "topics": topics(&memory.topics),
        "created_time": timestamp(memory.created_at),
        "updated_time": timestamp(memory.updated_at),
        "expire_time": timestamp(memory.expire_time),
    })
}

/// Wrap data in the success envelope
pub fn success(data: Value) -> Value {
    let mut response = Map::new();
    response.insert("status".to_string(), json!("success"));
    if let Value::Object(fields) = data {
        response.extend(fields);
    }
    Value::Object(response)
}

/// Error envelope with the stable kind and a caller-safe message
pub fn format_error(error: &MemoryBankError) -> Value {
    json!({
        "status": "error",
        "error_kind": error.kind(),
        "error": error.to_string(),
    })
}

/// Result of `initialize_memory_bank`
pub fn format_initialized(summary: &ConnectionSummary, already_initialized: bool) -> Value {
    success(json!({
        "agent_engine_name": summary.agent_engine_name,
        "project_id": summary.project_id,
        "location": summary.location,
        "established_at": timestamp(Some(summary.established_at)),
        "already_initialized": already_initialized,
    }))
}

/// Result of `create_memory`
pub fn format_created(memory: &MemoryRecord) -> Value {
    success(json!({ "memory": format_memory(memory) }))
}

/// Result of a successful `delete_memory`
pub fn format_deleted(memory_id: &str) -> Value {
    success(json!({
        "memory_id": memory_id,
        "deleted": true,
    }))
}

/// Result of `delete_memory` for an id absent from the scope
pub fn format_not_found(memory_id: &str, scope: &MemoryScope) -> Value {
    json!({
        "status": "not_found",
        "memory_id": memory_id,
        "scope": format_scope(scope),
        "deleted": false,
        "message": "No memory with this id exists in the given scope",
    })
}

/// Ordered memory listing
pub fn format_memory_list(
    scope: &MemoryScope,
    filter: Option<&BTreeSet<MemoryTopic>>,
    memories: &[MemoryRecord],
) -> Value {
    success(json!({
        "scope": format_scope(scope),
        "topics": filter.map(topics).unwrap_or(Value::Null),
        "count": memories.len(),
        "memories": memories.iter().map(format_memory).collect::<Vec<_>>(),
    }))
}

/// Ranked search results, most relevant first
pub fn format_search_results(scope: &MemoryScope, query: &str, results: &[SearchResult]) -> Value {
    let memories: Vec<Value> = results
        .iter()
        .map(|result| {
            let mut memory = format_memory(&result.memory);
            if let Value::Object(fields) = &mut memory {
                fields.insert("score".to_string(), json!(result.score));
            }
            memory
        })
        .collect();

    success(json!({
        "scope": format_scope(scope),
        "search_query": query,
        "count": memories.len(),
        "memories": memories,
    }))
}

/// Job status, with the memories it produced once completed
pub fn format_job(job: &GenerationJob, memories: Option<&[MemoryRecord]>) -> Value {
    let mut data = json!({
        "job_id": job.id,
        "status": job.status.as_str(),
        "done": job.status.is_terminal(),
        "scope": format_scope(&job.scope),
        "turns": job.conversation.len(),
    });

    if let Value::Object(fields) = &mut data {
        if !job.topics.is_empty() {
            fields.insert("topics".to_string(), topics(&job.topics));
        }
        if let Some(memories) = memories {
            fields.insert(
                "generated_memories".to_string(),
                Value::Array(memories.iter().map(format_memory).collect()),
            );
        }
        if let Some(reason) = &job.failure_reason {
            fields.insert("failure_reason".to_string(), json!(reason));
        }
    }

    success(data)
}
