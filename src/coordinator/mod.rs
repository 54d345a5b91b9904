//! Coordinator Process
//!
//! Owns the prison and its audit publication path, and brings them up and
//! down under cooperative cancellation.
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──start──► Starting ──► Running ──stop──► Stopping ──► Stopped
//!    │                  │ cancelled                                 ▲
//!    │◄─────────────────┘                                           │
//!    └────────────────────────────stop──────────────────────────────┘
//! ```
//!
//! - A cancelled `start` leaves the coordinator `Created`; `stop` still works
//! - `stop` always releases the audit path, even when cancelled: the drain
//!   worker is told to flush before `stop` starts waiting for it
//! - `start` while `Running` and `stop` while `Stopping` or `Stopped` are
//!   logged no-ops
//! - State queries do not wait for a `stop` that is flushing
//! - A stopped coordinator cannot be started again

mod cancel;
mod worker;

pub use cancel::{CancelSignal, CancelSource};

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::{AuditReceiver, OffenseSink, TracingSink};
use crate::config::CoordinatorConfig;
use crate::prison::{CoinJoinIdStore, OffenseRecord, Prison};
use worker::AuditWorker;

const CONFIG_FILE_NAME: &str = "CoordinatorConfig.json";
const COINJOIN_ID_STORE_FILE_NAME: &str = "CoinJoinIdStore.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Where a coordinator keeps its state
#[derive(Debug, Clone)]
pub struct CoordinatorParameters {
    work_dir: PathBuf,
}

impl CoordinatorParameters {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn config_file_path(&self) -> PathBuf {
        self.work_dir.join(CONFIG_FILE_NAME)
    }

    pub fn coinjoin_id_store_path(&self) -> PathBuf {
        self.work_dir.join(COINJOIN_ID_STORE_FILE_NAME)
    }
}

struct Lifecycle {
    state: CoordinatorState,
    /// Held until `start` hands it to the drain worker
    receiver: Option<AuditReceiver<OffenseRecord>>,
    worker: Option<AuditWorker>,
}

pub struct Coordinator {
    parameters: CoordinatorParameters,
    config: CoordinatorConfig,
    prison: Arc<Prison>,
    coinjoin_ids: Arc<CoinJoinIdStore>,
    sink: Arc<dyn OffenseSink>,
    lifecycle: Mutex<Lifecycle>,
}

impl Coordinator {
    /// Create a coordinator using the config file in the work dir,
    /// writing a default one if none exists yet
    pub fn new(parameters: CoordinatorParameters) -> Result<Self> {
        create_work_dir(parameters.work_dir())?;
        let config = CoordinatorConfig::load_or_create(&parameters.config_file_path())?;
        Self::with_config(parameters, config)
    }

    /// Create a coordinator with an explicit config. The config file is left untouched.
    pub fn with_config(parameters: CoordinatorParameters, config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        create_work_dir(parameters.work_dir())?;

        let coinjoin_ids = Arc::new(CoinJoinIdStore::new());
        let (prison, receiver) = Prison::new(config.prison.to_policy(), coinjoin_ids.clone());

        debug!(
            work_dir = %parameters.work_dir().display(),
            "Coordinator created"
        );

        Ok(Self {
            parameters,
            config,
            prison: Arc::new(prison),
            coinjoin_ids,
            sink: Arc::new(TracingSink),
            lifecycle: Mutex::new(Lifecycle {
                state: CoordinatorState::Created,
                receiver: Some(receiver),
                worker: None,
            }),
        })
    }

    /// Replace the audit sink. Takes effect at `start`.
    pub fn with_sink(mut self, sink: Arc<dyn OffenseSink>) -> Self {
        self.sink = sink;
        self
    }

    pub async fn start(&self, cancel: CancelSignal) -> Result<()> {
        if cancel.is_cancelled() {
            info!("Coordinator start cancelled before it began");
            return Ok(());
        }

        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            CoordinatorState::Created | CoordinatorState::Starting => {}
            CoordinatorState::Running => {
                warn!("Coordinator is already running, ignoring start");
                return Ok(());
            }
            CoordinatorState::Stopping | CoordinatorState::Stopped => {
                bail!("Coordinator has been stopped and cannot be started again");
            }
        }

        lifecycle.state = CoordinatorState::Starting;
        info!(
            work_dir = %self.parameters.work_dir().display(),
            "Starting coordinator"
        );

        let store_path = self.parameters.coinjoin_id_store_path();
        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.coinjoin_ids.load_file(&store_path) => Some(result),
        };

        match loaded {
            None => {
                lifecycle.state = CoordinatorState::Created;
                info!("Coordinator start cancelled, nothing was started");
                return Ok(());
            }
            Some(Err(e)) => {
                lifecycle.state = CoordinatorState::Created;
                return Err(e).context("Failed to start coordinator");
            }
            Some(Ok(_)) => {}
        }

        if cancel.is_cancelled() {
            lifecycle.state = CoordinatorState::Created;
            info!("Coordinator start cancelled, nothing was started");
            return Ok(());
        }

        let Some(receiver) = lifecycle.receiver.take() else {
            lifecycle.state = CoordinatorState::Stopped;
            bail!("Audit channel was already released");
        };
        lifecycle.worker = Some(AuditWorker::spawn(receiver, self.sink.clone()));
        lifecycle.state = CoordinatorState::Running;

        info!(
            coinjoins = self.coinjoin_ids.len(),
            offenders = self.prison.offender_count(),
            "Coordinator running"
        );
        Ok(())
    }

    pub async fn stop(&self, cancel: CancelSignal) -> Result<()> {
        let worker = {
            let mut lifecycle = self.lifecycle.lock().await;

            match lifecycle.state {
                CoordinatorState::Stopped => {
                    debug!("Coordinator already stopped");
                    return Ok(());
                }
                CoordinatorState::Stopping => {
                    debug!("Coordinator is already stopping");
                    return Ok(());
                }
                CoordinatorState::Created | CoordinatorState::Starting => {
                    // Never started: flush whatever was recorded in the meantime.
                    if let Some(mut receiver) = lifecycle.receiver.take() {
                        worker::flush(&mut receiver, self.sink.as_ref());
                    }
                    lifecycle.state = CoordinatorState::Stopped;
                    info!("Coordinator stopped before it was started");
                    return Ok(());
                }
                CoordinatorState::Running => {}
            }

            lifecycle.state = CoordinatorState::Stopping;
            lifecycle.worker.take()
        };

        // The lifecycle lock is released while the worker flushes.
        info!("Stopping coordinator");

        if let Some(worker) = worker {
            worker.signal_shutdown();

            let timeout = Duration::from_secs(self.config.audit.stop_timeout_secs);
            tokio::select! {
                biased;
                joined = tokio::time::timeout(timeout, worker.join()) => match joined {
                    Ok(Ok(persisted)) => debug!(persisted = persisted, "Audit worker joined"),
                    Ok(Err(e)) => warn!("Audit worker failed during shutdown: {:#}", e),
                    Err(_) => warn!(
                        timeout_secs = timeout.as_secs(),
                        "Audit worker still flushing, continuing in background"
                    ),
                },
                _ = cancel.cancelled() => {
                    info!("Coordinator stop cancelled, audit worker finishes in background");
                }
            }
        }

        self.prison.warn_if_audit_closed();
        self.lifecycle.lock().await.state = CoordinatorState::Stopped;
        info!("Coordinator stopped");
        Ok(())
    }

    pub async fn state(&self) -> CoordinatorState {
        self.lifecycle.lock().await.state
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == CoordinatorState::Running
    }

    /// Shared handle for the round engine
    pub fn prison(&self) -> Arc<Prison> {
        self.prison.clone()
    }

    pub fn coinjoin_ids(&self) -> Arc<CoinJoinIdStore> {
        self.coinjoin_ids.clone()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn parameters(&self) -> &CoordinatorParameters {
        &self.parameters
    }
}

fn create_work_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create work dir {}", path.display()))
}
