//! Memory Bank MCP server
//!
//! Serves the memory bank tools over stdio. When the environment names a
//! project and a credential, the connection is established at startup so
//! callers can skip `initialize_memory_bank`.

use anyhow::Context;
use clap::Parser;
use memory_bank::{
    AppState, BankConfig, McpServer, MemoryClient, ServerSettings, ToolHandler,
    VertexMemoryBackend,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memory-bank-mcp")]
#[command(about = "MCP server giving AI agents long-term memory through Vertex AI Memory Bank", long_about = None)]
#[command(version)]
struct Cli {
    /// Set log level
    #[arg(short, long, default_value = "info", env = "MEMORY_BANK_LOG_LEVEL")]
    log_level: String,

    /// Settings file (defaults to <config dir>/memory-bank-mcp/config.toml)
    #[arg(long, env = "MEMORY_BANK_CONFIG")]
    config: Option<PathBuf>,

    /// Do not connect at startup even when the environment is complete
    #[arg(long)]
    no_auto_init: bool,

    /// Longest wait for a generation job, in seconds
    #[arg(long)]
    poll_timeout_secs: Option<u64>,

    /// Delay before the first generation poll, in milliseconds
    #[arg(long)]
    poll_initial_ms: Option<u64>,

    /// Largest accepted top_k
    #[arg(long)]
    max_top_k: Option<usize>,
}

impl Cli {
    fn settings(&self) -> anyhow::Result<ServerSettings> {
        let mut settings =
            ServerSettings::load(self.config.as_deref()).context("Failed to load settings")?;

        if let Some(secs) = self.poll_timeout_secs {
            settings.poll.timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.poll_initial_ms {
            settings.poll.initial_interval = Duration::from_millis(ms);
            settings.poll.max_interval = settings.poll.max_interval.max(settings.poll.initial_interval);
        }
        if let Some(max_top_k) = self.max_top_k {
            settings.max_top_k = max_top_k;
            settings.default_top_k = settings.default_top_k.min(max_top_k);
        }

        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Our own level for the crate, quieter for HTTP internals
    let filter = EnvFilter::new(format!(
        "memory_bank={0},memory_bank_mcp={0},reqwest=warn,hyper=warn,rustls=warn",
        level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // stdout carries the protocol
        .init();

    debug!("memory-bank-mcp v{} starting...", env!("CARGO_PKG_VERSION"));

    let settings = cli.settings()?;
    let defaults = BankConfig::from_env();

    let backend = VertexMemoryBackend::new().context("Failed to build HTTP client")?;
    let client = MemoryClient::new(Arc::new(backend));
    let state = Arc::new(AppState::new(client.clone()));

    if cli.no_auto_init {
        debug!("Startup initialization disabled");
    } else if defaults.can_auto_initialize() {
        let state = Arc::clone(&state);
        let config = defaults.clone();
        tokio::spawn(async move {
            match state.initialize(&config).await {
                Ok(outcome) => info!("Connected at startup to {}", outcome.handle.engine_name),
                Err(e) => warn!(
                    "Startup initialization failed ({}); tools will wait for initialize_memory_bank",
                    e
                ),
            }
        });
    } else {
        debug!("No engine configured for startup; waiting for initialize_memory_bank");
    }

    let tool_handler = ToolHandler::new(Arc::clone(&state), client, settings, defaults);
    let server = McpServer::new(tool_handler);

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping MCP server gracefully...");
        }
    }

    state.reset();
    info!("MCP server shut down complete");
    Ok(())
}
