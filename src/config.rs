//! Configuration for the memory bank connection and the tool server
//!
//! `BankConfig` describes which hosted memory bank to talk to. Credentials are
//! referenced by environment variable name and only resolved into a secret at
//! connection time. `ServerSettings` holds the tunables of the tool layer and
//! can be loaded from a TOML file.

use crate::error::{MemoryBankError, Result};
use crate::types::MemoryTopic;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Location used when none is configured
pub const DEFAULT_LOCATION: &str = "us-central1";

/// Variables searched for a credential when no explicit reference is given
pub const DEFAULT_CREDENTIAL_VARS: [&str; 2] = ["GOOGLE_OAUTH_ACCESS_TOKEN", "GOOGLE_API_KEY"];

/// Where the credential for the memory service lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsRef {
    /// Environment variable holding an OAuth access token or API key.
    /// When unset, [`DEFAULT_CREDENTIAL_VARS`] are tried in order.
    pub env_var: Option<String>,
}

impl CredentialsRef {
    /// Reference a specific environment variable
    pub fn env(name: impl Into<String>) -> Self {
        Self {
            env_var: Some(name.into()),
        }
    }

    /// Resolve the credential from the process environment
    pub fn resolve(&self) -> Result<SecretString> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve the credential through an arbitrary variable lookup
    pub fn resolve_with<F>(&self, lookup: F) -> Result<SecretString>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(name) = &self.env_var {
            return non_empty(name)
                .map(|value| SecretString::new(value.into()))
                .ok_or_else(|| {
                    MemoryBankError::Configuration(format!(
                        "credential variable {} is not set",
                        name
                    ))
                });
        }

        for name in DEFAULT_CREDENTIAL_VARS {
            if let Some(value) = non_empty(name) {
                debug!("Using credential from {}", name);
                return Ok(SecretString::new(value.into()));
            }
        }

        Err(MemoryBankError::Configuration(format!(
            "no credentials found; set one of {}",
            DEFAULT_CREDENTIAL_VARS.join(", ")
        )))
    }
}

/// Which memory bank to connect to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankConfig {
    /// Google Cloud project id
    pub project_id: String,

    /// Google Cloud region hosting the engine
    #[serde(default = "default_location")]
    pub location: String,

    /// Existing engine resource name to reuse instead of creating one
    #[serde(default)]
    pub agent_engine_name: Option<String>,

    /// Managed topics the engine extracts when it is created here
    #[serde(default)]
    pub memory_topics: BTreeSet<MemoryTopic>,

    /// Credential reference
    #[serde(default)]
    pub credentials: CredentialsRef,

    /// Override for the service base URL
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: default_location(),
            agent_engine_name: None,
            memory_topics: BTreeSet::new(),
            credentials: CredentialsRef::default(),
            endpoint: None,
        }
    }
}

impl BankConfig {
    /// Config for a project in the default location
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Build a config from environment variables:
    /// - `GOOGLE_CLOUD_PROJECT`
    /// - `GOOGLE_CLOUD_LOCATION` (default us-central1)
    /// - `AGENT_ENGINE_NAME`
    /// - `MEMORY_BANK_CREDENTIALS_ENV`
    /// - `MEMORY_BANK_ENDPOINT`
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        Self {
            project_id: var("GOOGLE_CLOUD_PROJECT").unwrap_or_default(),
            location: var("GOOGLE_CLOUD_LOCATION").unwrap_or_else(default_location),
            agent_engine_name: var("AGENT_ENGINE_NAME"),
            memory_topics: BTreeSet::new(),
            credentials: CredentialsRef {
                env_var: var("MEMORY_BANK_CREDENTIALS_ENV"),
            },
            endpoint: var("MEMORY_BANK_ENDPOINT"),
        }
    }

    /// Check required fields
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(MemoryBankError::Configuration(
                "project_id is required".to_string(),
            ));
        }

        let location_ok = !self.location.is_empty()
            && self
                .location
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !location_ok {
            return Err(MemoryBankError::Configuration(format!(
                "invalid location: {:?}",
                self.location
            )));
        }

        if let Some(name) = &self.agent_engine_name {
            if !name.starts_with("projects/") || !name.contains("/reasoningEngines/") {
                return Err(MemoryBankError::Configuration(format!(
                    "agent_engine_name must look like projects/<p>/locations/<l>/reasoningEngines/<id>, got {:?}",
                    name
                )));
            }
        }

        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
                return Err(MemoryBankError::Configuration(format!(
                    "endpoint must be an http(s) URL, got {:?}",
                    endpoint
                )));
            }
        }

        Ok(())
    }

    /// Whether the config names a project and a credential can be found.
    /// Used to decide on initialization at startup.
    pub fn is_complete(&self) -> bool {
        self.validate().is_ok() && self.credentials.resolve().is_ok()
    }

    /// Complete and naming an existing engine. Startup must not create an
    /// engine nobody asked for.
    pub fn can_auto_initialize(&self) -> bool {
        self.agent_engine_name.is_some() && self.is_complete()
    }
}

/// Backoff schedule for waiting on a generation job
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Delay before the first poll
    #[serde(rename = "initial_interval_ms", with = "serde_millis")]
    pub initial_interval: Duration,

    /// Growth factor applied after each poll
    pub multiplier: f64,

    /// Upper bound for a single delay
    #[serde(rename = "max_interval_ms", with = "serde_millis")]
    pub max_interval: Duration,

    /// Hard wall-clock bound for the whole wait
    #[serde(rename = "timeout_ms", with = "serde_millis")]
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(8),
            timeout: Duration::from_secs(60),
        }
    }
}

impl PollPolicy {
    /// Check the schedule is bounded and makes progress
    pub fn validate(&self) -> Result<()> {
        if self.initial_interval.is_zero() {
            return Err(MemoryBankError::Configuration(
                "poll initial interval must be positive".to_string(),
            ));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(MemoryBankError::Configuration(format!(
                "poll multiplier must be a finite number >= 1, got {}",
                self.multiplier
            )));
        }
        if self.max_interval < self.initial_interval {
            return Err(MemoryBankError::Configuration(
                "poll max interval must not be below the initial interval".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(MemoryBankError::Configuration(
                "poll timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tunables of the tool layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Generation wait schedule
    pub poll: PollPolicy,

    /// Upper bound for `top_k`; larger requests are clamped
    pub max_top_k: usize,

    /// `top_k` used when the caller gives none
    pub default_top_k: usize,

    /// Longest accepted fact, in characters
    pub max_fact_len: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            max_top_k: 50,
            default_top_k: 5,
            max_fact_len: 10_000,
        }
    }
}

impl ServerSettings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load settings from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let settings: ServerSettings = toml::from_str(toml_str)
            .map_err(|e| MemoryBankError::Configuration(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path` when given, else from the default location when that
    /// file exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            debug!("Loading settings from {}", path.display());
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                debug!("Loading settings from {}", path.display());
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/memory-bank-mcp/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("memory-bank-mcp").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.poll.validate()?;
        if self.max_top_k == 0 {
            return Err(MemoryBankError::Configuration(
                "max_top_k must be at least 1".to_string(),
            ));
        }
        if self.default_top_k == 0 || self.default_top_k > self.max_top_k {
            return Err(MemoryBankError::Configuration(format!(
                "default_top_k must be between 1 and max_top_k ({})",
                self.max_top_k
            )));
        }
        if self.max_fact_len == 0 {
            return Err(MemoryBankError::Configuration(
                "max_fact_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

mod serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
