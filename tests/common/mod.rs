//! Common test utilities and helpers
//!
//! `FakeBackend` stands in for the hosted memory service: memories live in a
//! vector, search scores by keyword overlap, and generation jobs follow a
//! scripted outcome after a given number of polls.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use memory_bank::error::{MemoryBankError, Result};
use memory_bank::{
    AppState, BankConfig, ConnectionHandle, ConversationTurn, CredentialsRef, JobProgress,
    MemoryBackend, MemoryClient, MemoryRecord, MemoryScope, MemoryTopic, NewMemory,
    RetrievalQuery, SearchResult, ServerSettings, ToolHandler,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

/// Variable the test credential is read from
pub const TEST_CREDENTIAL_VAR: &str = "MEMORY_BANK_TEST_TOKEN";

/// Engine every fake connection reports
pub const FAKE_ENGINE: &str = "projects/test-project/locations/us-central1/reasoningEngines/424242";

static CREDENTIAL: Once = Once::new();

/// Config pointing at the fake, with a credential that resolves
pub fn test_config() -> BankConfig {
    CREDENTIAL.call_once(|| std::env::set_var(TEST_CREDENTIAL_VAR, "ya29.test-token"));

    BankConfig {
        credentials: CredentialsRef::env(TEST_CREDENTIAL_VAR),
        ..BankConfig::new("test-project")
    }
}

/// How a scripted generation job ends
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Create these facts and complete on the given poll
    Complete {
        after_polls: usize,
        facts: Vec<(String, Vec<MemoryTopic>)>,
    },
    /// Fail on the given poll without creating anything
    Fail { after_polls: usize, reason: String },
    /// Stay RUNNING forever
    Never,
}

#[derive(Debug)]
struct FakeJob {
    scope: MemoryScope,
    outcome: Outcome,
    polls: usize,
    settled: Option<JobProgress>,
}

/// In-memory memory service
pub struct FakeBackend {
    memories: Mutex<Vec<MemoryRecord>>,
    jobs: Mutex<HashMap<String, FakeJob>>,
    outcome: Mutex<Outcome>,
    connects: AtomicUsize,
    polls: AtomicUsize,
    clock: AtomicI64,
    connect_delay: Duration,
    leak_scopes: bool,
    fail_connect: bool,
    fail_polls: bool,
    poll_delay: Duration,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            memories: Mutex::new(Vec::new()),
            jobs: Mutex::new(HashMap::new()),
            outcome: Mutex::new(Outcome::Never),
            connects: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            clock: AtomicI64::new(0),
            connect_delay: Duration::ZERO,
            leak_scopes: false,
            fail_connect: false,
            fail_polls: false,
            poll_delay: Duration::ZERO,
        }
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connect slowly so concurrent initializers overlap
    pub fn with_connect_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            connect_delay: delay,
            ..Self::default()
        })
    }

    /// Return every stored memory from list and search, ignoring scope
    pub fn leaky() -> Arc<Self> {
        Arc::new(Self {
            leak_scopes: true,
            ..Self::default()
        })
    }

    /// Refuse every connection attempt
    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            fail_connect: true,
            ..Self::default()
        })
    }

    /// Start jobs normally but fail every status check
    pub fn failing_polls() -> Arc<Self> {
        Arc::new(Self {
            fail_polls: true,
            ..Self::default()
        })
    }

    /// Take `delay` to answer each status check
    pub fn with_poll_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            poll_delay: delay,
            ..Self::default()
        })
    }

    /// Script the outcome of jobs started from now on
    pub fn script(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Vec<MemoryRecord> {
        self.memories.lock().unwrap().clone()
    }

    /// Insert a memory directly, bypassing the tools
    pub fn seed(&self, fact: &str, scope: MemoryScope, topics: &[MemoryTopic]) -> String {
        self.insert(fact.to_string(), scope, topics.iter().copied().collect(), None)
            .id
    }

    fn tick(&self) -> DateTime<Utc> {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        base + ChronoDuration::seconds(self.clock.fetch_add(1, Ordering::SeqCst))
    }

    fn insert(
        &self,
        fact: String,
        scope: MemoryScope,
        topics: BTreeSet<MemoryTopic>,
        expire_time: Option<DateTime<Utc>>,
    ) -> MemoryRecord {
        let now = self.tick();
        let record = MemoryRecord {
            id: uuid::Uuid::new_v4().simple().to_string(),
            fact,
            scope,
            topics,
            created_at: Some(now),
            updated_at: Some(now),
            expire_time,
        };
        self.memories.lock().unwrap().push(record.clone());
        record
    }

    fn visible(&self, scope: &MemoryScope) -> Vec<MemoryRecord> {
        self.memories
            .lock()
            .unwrap()
            .iter()
            .filter(|m| self.leak_scopes || &m.scope == scope)
            .cloned()
            .collect()
    }
}

fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

#[async_trait]
impl MemoryBackend for FakeBackend {
    async fn connect(&self, config: &BankConfig, credential: SecretString) -> Result<ConnectionHandle> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.fail_connect {
            return Err(MemoryBankError::BackendUnavailable(
                "connection refused".to_string(),
            ));
        }

        let engine = config
            .agent_engine_name
            .clone()
            .unwrap_or_else(|| FAKE_ENGINE.to_string());
        Ok(ConnectionHandle::new(engine, config, "http://fake", credential))
    }

    async fn create_memory(&self, _handle: &ConnectionHandle, memory: &NewMemory) -> Result<MemoryRecord> {
        Ok(self.insert(
            memory.fact.clone(),
            memory.scope.clone(),
            memory.topics.clone(),
            memory.expire_time,
        ))
    }

    async fn list_memories(&self, _handle: &ConnectionHandle, scope: &MemoryScope) -> Result<Vec<MemoryRecord>> {
        Ok(self.visible(scope))
    }

    async fn delete_memory(
        &self,
        _handle: &ConnectionHandle,
        scope: &MemoryScope,
        memory_id: &str,
    ) -> Result<()> {
        let mut memories = self.memories.lock().unwrap();
        let position = memories
            .iter()
            .position(|m| m.id == memory_id && &m.scope == scope)
            .ok_or_else(|| MemoryBankError::MemoryNotFound(memory_id.to_string()))?;
        memories.remove(position);
        Ok(())
    }

    async fn search_memories(
        &self,
        _handle: &ConnectionHandle,
        query: &RetrievalQuery,
    ) -> Result<Vec<SearchResult>> {
        let wanted = words(&query.search_query);
        let results = self
            .visible(&query.scope)
            .into_iter()
            .map(|memory| {
                let shared = words(&memory.fact).intersection(&wanted).count();
                SearchResult {
                    score: shared as f32 / wanted.len().max(1) as f32,
                    memory,
                }
            })
            .collect();
        Ok(results)
    }

    async fn start_generation(
        &self,
        _handle: &ConnectionHandle,
        scope: &MemoryScope,
        _conversation: &[ConversationTurn],
    ) -> Result<String> {
        let id = format!("{}/operations/{}", FAKE_ENGINE, uuid::Uuid::new_v4().simple());
        let job = FakeJob {
            scope: scope.clone(),
            outcome: self.outcome.lock().unwrap().clone(),
            polls: 0,
            settled: None,
        };
        self.jobs.lock().unwrap().insert(id.clone(), job);
        Ok(id)
    }

    async fn poll_generation(&self, _handle: &ConnectionHandle, job_id: &str) -> Result<JobProgress> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        if self.fail_polls {
            return Err(MemoryBankError::BackendUnavailable(
                "status check rejected".to_string(),
            ));
        }

        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| MemoryBankError::MemoryNotFound(job_id.to_string()))?;
        if let Some(settled) = &job.settled {
            return Ok(settled.clone());
        }
        job.polls += 1;

        let progress = match job.outcome.clone() {
            Outcome::Complete { after_polls, facts } if job.polls >= after_polls => {
                let memory_ids = facts
                    .into_iter()
                    .map(|(fact, topics)| {
                        self.insert(fact, job.scope.clone(), topics.into_iter().collect(), None)
                            .id
                    })
                    .collect();
                JobProgress::Completed { memory_ids }
            }
            Outcome::Fail { after_polls, reason } if job.polls >= after_polls => {
                JobProgress::Failed { reason }
            }
            _ => JobProgress::Running,
        };

        if matches!(
            progress,
            JobProgress::Completed { .. } | JobProgress::Failed { .. }
        ) {
            job.settled = Some(progress.clone());
        }
        Ok(progress)
    }
}

/// Tool handler over `backend` with default settings
pub fn handler(backend: Arc<FakeBackend>) -> ToolHandler {
    handler_with(backend, ServerSettings::default())
}

/// Tool handler over `backend` with the given settings
pub fn handler_with(backend: Arc<FakeBackend>, settings: ServerSettings) -> ToolHandler {
    let client = MemoryClient::new(backend);
    let state = Arc::new(AppState::new(client.clone()));
    ToolHandler::new(state, client, settings, test_config())
}

/// Tool handler that has already been initialized
pub async fn initialized_handler(backend: Arc<FakeBackend>) -> ToolHandler {
    let handler = handler(backend);
    handler
        .execute(
            memory_bank::ToolName::InitializeMemoryBank,
            json!({}),
        )
        .await
        .expect("initialize against the fake backend");
    handler
}

/// Scope argument for a user
pub fn scope(user_id: &str) -> Value {
    json!({ "user_id": user_id })
}

/// Facts of a listing or search payload, in payload order
pub fn facts(payload: &Value) -> Vec<String> {
    payload["memories"]
        .as_array()
        .expect("memories array")
        .iter()
        .map(|m| m["fact"].as_str().unwrap_or_default().to_string())
        .collect()
}
