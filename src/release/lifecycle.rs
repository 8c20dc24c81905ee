use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Phase, Release};
use crate::error::{EngineError, Result};
use crate::models::State;
use crate::storage::ReleaseStore;

/// Owner-side handle to the release of a running operation.
///
/// The main flow and the interrupt handler share one handle. Every phase
/// change holds the mutex across both the in-memory update and the store
/// write, so a late interrupt can never overwrite a terminal phase that has
/// already been persisted.
#[derive(Clone)]
pub struct ReleaseHandle {
    inner: Arc<Mutex<Release>>,
    store: Arc<dyn ReleaseStore>,
}

impl ReleaseHandle {
    /// Persist a new release and return a handle to it.
    pub async fn create(release: Release, store: Arc<dyn ReleaseStore>) -> Result<Self> {
        store.create(&release).await.map_err(|e| {
            EngineError::storage(format!("creating release revision {}", release.revision), e)
        })?;
        info!(
            project = %release.project,
            stack = %release.stack,
            workspace = %release.workspace,
            revision = release.revision,
            "Release created"
        );
        Ok(Self {
            inner: Arc::new(Mutex::new(release)),
            store,
        })
    }

    /// Wrap a release that is already persisted.
    pub fn attach(release: Release, store: Arc<dyn ReleaseStore>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(release)),
            store,
        }
    }

    pub async fn phase(&self) -> Phase {
        self.inner.lock().await.phase
    }

    pub async fn snapshot(&self) -> Release {
        self.inner.lock().await.clone()
    }

    /// Replace the recorded state; persisted with the next transition.
    pub async fn set_state(&self, state: State) {
        let mut release = self.inner.lock().await;
        release.state = state;
        release.modified_time = Utc::now();
    }

    /// Replace the recorded state and persist it without touching the phase.
    pub async fn record_state(&self, state: State) -> Result<()> {
        let mut release = self.inner.lock().await;
        release.state = state;
        release.modified_time = Utc::now();
        self.store.update(&release).await.map_err(|e| {
            EngineError::storage(format!("persisting state of revision {}", release.revision), e)
        })
    }

    /// Move to `next` and persist. Returns `Ok(false)` when the release is
    /// already terminal (or already in `next`) and nothing was written.
    ///
    /// A store failure is reported but the in-memory phase keeps the new value.
    pub async fn transition(&self, next: Phase) -> Result<bool> {
        let mut release = self.inner.lock().await;
        let current = release.phase;
        if current == next || current.is_terminal() {
            debug!(from = %current, to = %next, "Release transition ignored");
            return Ok(false);
        }
        if !current.can_transition_to(next) {
            return Err(EngineError::Validation(format!(
                "release revision {} cannot move from {} to {}",
                release.revision, current, next
            )));
        }

        release.phase = next;
        release.modified_time = Utc::now();
        let snapshot = release.clone();
        self.store.update(&snapshot).await.map_err(|e| {
            EngineError::storage(format!("persisting release phase {}", next), e)
        })?;
        debug!(revision = snapshot.revision, from = %current, to = %next, "Release phase updated");
        Ok(true)
    }

    /// Interrupt-path transition to `Failed`; a no-op on terminal releases.
    /// Failures are logged rather than returned.
    pub async fn fail_on_interrupt(&self) -> bool {
        match self.transition(Phase::Failed).await {
            Ok(applied) => applied,
            Err(e) => {
                warn!(error = %e, "Failed to mark release as failed after interrupt");
                false
            }
        }
    }

    /// Persist the terminal phase matching `outcome`. A storage failure is
    /// joined with the operative error instead of replacing it.
    pub async fn finalize<T>(&self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.transition(Phase::Succeeded).await?;
                Ok(value)
            }
            Err(err) => match self.transition(Phase::Failed).await {
                Ok(_) => Err(err),
                Err(store_err) => Err(err.join(store_err)),
            },
        }
    }
}
