use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::planner::ChangeOrder;

/// Optional hook that forwards local ports to applied workloads once an
/// apply has succeeded.
#[async_trait]
pub trait PortForwarder: Send + Sync {
    /// Forward ports for the resources of `order` until `stop` fires.
    async fn forward(&self, order: &ChangeOrder, stop: CancellationToken) -> anyhow::Result<()>;

    /// Tear down any forwarding still in place.
    async fn stop(&self) -> anyhow::Result<()>;
}

/// Cancel `token` on SIGINT or SIGTERM. The listener exits quietly once the
/// token is cancelled by someone else.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(term), Ok(int)) => (term, int),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!(error = %e, "Failed to register signal handlers");
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
                _ = token.cancelled() => return,
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to listen for ctrl-c");
                        return;
                    }
                    info!("Received ctrl-c");
                }
                _ = token.cancelled() => return,
            }
        }

        token.cancel();
    })
}

/// Run an exit cleanup step, giving up after `grace`.
pub async fn run_cleanup<F>(what: &str, grace: Duration, cleanup: F)
where
    F: Future<Output = anyhow::Result<()>>,
{
    match tokio::time::timeout(grace, cleanup).await {
        Ok(Ok(())) => debug!(what = what, "Cleanup finished"),
        Ok(Err(e)) => warn!(what = what, error = %e, "Cleanup failed"),
        Err(_) => warn!(
            what = what,
            grace_ms = grace.as_millis() as u64,
            "Cleanup did not finish within the grace period; continuing"
        ),
    }
}
