use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::callback::{CallbackIngestor, CallbackIngestorBuilder};
use crate::domain::WorkOrder;
use crate::error::{ManagerError, TriggerError};
use crate::executor::ExecutorContext;
use crate::manager::WorkOrderManager;
use crate::ports::WorkOrderIdGenerator;
use crate::reconciler::{Reconciler, TickReport};
use crate::trigger::{SourceAssetEvent, create_from_event};
use crate::workflow::WorkflowLoader;

use super::status::WorkOrderCounts;

/// Owns the wiring of one orchestrator instance. Build it with
/// `OrchestratorBuilder`, then `start()` the reconcile loop.
pub struct Orchestrator {
    manager: WorkOrderManager,
    loader: Arc<WorkflowLoader>,
    reconciler: Arc<Reconciler>,
    context: ExecutorContext,
    ids: Arc<dyn WorkOrderIdGenerator>,
    interval: Duration,
}

impl Orchestrator {
    pub(crate) fn new(
        manager: WorkOrderManager,
        loader: Arc<WorkflowLoader>,
        reconciler: Arc<Reconciler>,
        context: ExecutorContext,
        ids: Arc<dyn WorkOrderIdGenerator>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            loader,
            reconciler,
            context,
            ids,
            interval,
        }
    }

    pub fn manager(&self) -> &WorkOrderManager {
        &self.manager
    }

    pub fn context(&self) -> &ExecutorContext {
        &self.context
    }

    /// Start a callback ingestor bound to this orchestrator's manager.
    pub fn callbacks(&self) -> CallbackIngestorBuilder {
        CallbackIngestor::builder(self.manager.clone())
    }

    /// Entry point for the storage notification listener.
    pub async fn on_source_asset(&self, event: &SourceAssetEvent) -> Result<WorkOrder, TriggerError> {
        create_from_event(&self.manager, &self.loader, self.ids.as_ref(), event).await
    }

    /// Run one reconcile pass outside the loop.
    pub async fn tick(&self) -> Result<TickReport, ManagerError> {
        self.reconciler.tick().await
    }

    pub async fn counts(&self) -> Result<WorkOrderCounts, ManagerError> {
        let open = self.manager.get_open_work_orders().await?;
        Ok(WorkOrderCounts::from_orders(&open))
    }

    /// Spawn the reconcile loop.
    ///
    /// Ticks run inline in the loop, so at most one is in flight; ticks that
    /// come due while one is still running are skipped, not queued.
    pub fn start(&self) -> OrchestratorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let reconciler = Arc::clone(&self.reconciler);
        let period = self.interval;

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval = ?period, "reconcile loop started");

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // sender dropped
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = reconciler.tick().await {
                            error!(error = %e, "reconcile tick failed");
                        }
                    }
                }
            }
            info!("reconcile loop stopped");
        });

        OrchestratorHandle { shutdown_tx, join }
    }
}

/// Stops the reconcile loop. An in-flight tick always runs to completion.
pub struct OrchestratorHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl OrchestratorHandle {
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(error = %e, "reconcile loop panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
