//! Connection state shared by every tool invocation
//!
//! Owns the single [`ConnectionHandle`] of the process. Establishing the
//! connection goes through an async gate so racing first calls produce one
//! connection; reading the established handle only clones an `Arc`.
//!
//! Resetting never waits on the gate. Each reset bumps an epoch, and a
//! connect that started under an older epoch is discarded instead of being
//! installed.

use crate::backend::ConnectionHandle;
use crate::client::MemoryClient;
use crate::config::BankConfig;
use crate::error::{MemoryBankError, Result};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Outcome of an initialize call
#[derive(Debug, Clone)]
pub struct Initialized {
    /// The process-wide connection
    pub handle: Arc<ConnectionHandle>,

    /// False when an earlier call had already connected
    pub newly_established: bool,
}

#[derive(Default)]
struct Slot {
    epoch: u64,
    handle: Option<Arc<ConnectionHandle>>,
}

/// Application state: the connection and how to make it
pub struct AppState {
    client: MemoryClient,
    init_gate: Mutex<()>,
    connection: RwLock<Slot>,
}

impl AppState {
    /// Create uninitialized state
    pub fn new(client: MemoryClient) -> Self {
        Self {
            client,
            init_gate: Mutex::new(()),
            connection: RwLock::new(Slot::default()),
        }
    }

    /// Connect once. Calls after a success return the existing handle without
    /// reconnecting, even if they carry a different config; use
    /// [`AppState::reinitialize`] to switch.
    pub async fn initialize(&self, config: &BankConfig) -> Result<Initialized> {
        if let Some(handle) = self.current() {
            return Ok(self.existing(handle, config));
        }

        config.validate()?;

        let _gate = self.init_gate.lock().await;
        if let Some(handle) = self.current() {
            return Ok(self.existing(handle, config));
        }

        self.establish(config).await
    }

    /// Drop the current connection and connect with `config`
    pub async fn reinitialize(&self, config: &BankConfig) -> Result<Initialized> {
        config.validate()?;

        let _gate = self.init_gate.lock().await;
        self.clear();
        self.establish(config).await
    }

    /// The connection, or `NotInitialized`
    pub fn require_initialized(&self) -> Result<Arc<ConnectionHandle>> {
        self.current().ok_or(MemoryBankError::NotInitialized)
    }

    /// Whether a connection is established
    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    /// Invalidate the connection. Tools fail with `NotInitialized` until the
    /// next successful initialize, and a connect still in flight is dropped
    /// when it completes.
    pub fn reset(&self) {
        if self.clear() {
            info!("Memory bank connection reset");
        }
    }

    async fn establish(&self, config: &BankConfig) -> Result<Initialized> {
        let credential = config.credentials.resolve()?;
        let epoch = self.slot().epoch;
        let handle = Arc::new(self.client.connect(config, credential).await?);

        {
            let mut slot = self.slot_mut();
            if slot.epoch != epoch {
                warn!(
                    "Discarding connection to {}: state was reset while connecting",
                    handle.engine_name
                );
                return Err(MemoryBankError::BackendUnavailable(
                    "connection was reset while initializing; initialize again".to_string(),
                ));
            }
            slot.handle = Some(Arc::clone(&handle));
        }

        info!(
            "Memory bank initialized: engine {} ({} / {})",
            handle.engine_name, handle.project_id, handle.location
        );
        Ok(Initialized {
            handle,
            newly_established: true,
        })
    }

    fn existing(&self, handle: Arc<ConnectionHandle>, config: &BankConfig) -> Initialized {
        if !handle.matches(config) {
            warn!(
                "initialize requested {} / {} but already connected to {}; keeping the existing connection",
                config.project_id, config.location, handle.engine_name
            );
        }
        Initialized {
            handle,
            newly_established: false,
        }
    }

    fn current(&self) -> Option<Arc<ConnectionHandle>> {
        self.slot().handle.clone()
    }

    /// Drop the handle and start a new epoch; true if a handle was dropped
    fn clear(&self) -> bool {
        let mut slot = self.slot_mut();
        slot.epoch += 1;
        slot.handle.take().is_some()
    }

    fn slot(&self) -> RwLockReadGuard<'_, Slot> {
        self.connection.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_mut(&self) -> RwLockWriteGuard<'_, Slot> {
        self.connection.write().unwrap_or_else(PoisonError::into_inner)
    }
}
