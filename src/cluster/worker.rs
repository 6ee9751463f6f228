use super::{Cluster, ClusterState};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Level, event};

/// Background task running tend on a fixed period.
///
/// The task only holds a weak handle to the cluster between ticks, so
/// dropping the last cluster handle ends it.
pub(crate) struct TendWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl TendWorker {
    /// Signals the worker to stop and waits for the current tick to finish.
    pub(crate) async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            if let Err(err) = join_handle.await {
                if !err.is_cancelled() {
                    event!(Level::WARN, error = %err, "tend worker ended abnormally");
                }
            }
        }
    }
}

impl Drop for TendWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

pub(crate) fn spawn_tend_worker(
    cluster: Weak<Cluster>,
    interval: Duration,
    wakeup: Arc<Notify>,
) -> TendWorker {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let join_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    break;
                }
                _ = sleep(interval) => {}
                _ = wakeup.notified() => {}
            }

            let Some(cluster) = cluster.upgrade() else {
                break;
            };
            if cluster.state() == ClusterState::Closed {
                break;
            }
            if let Err(err) = cluster.tend_now().await {
                event!(Level::WARN, error = %err, "tend tick skipped");
            }
        }
    });

    TendWorker {
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}
