//! Reconciler: one evaluation pass over every open work order.
//!
//! Per order:
//! 1. every task `COMPLETED` -> close the order, nothing else this tick
//! 2. otherwise, per task in declaration order:
//!    - `PENDING` with all dependencies `COMPLETED` -> `start`
//!    - `IN_PROGRESS` with a registered poller -> `poll`
//!
//! Readiness is judged against the order as read at the start of the tick,
//! so a task started in this tick never unblocks its dependents until the
//! next one. Failures are isolated per task and per order; nothing is
//! retried within a tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::domain::{Task, TaskStatus, WorkOrder, WorkOrderStatus};
use crate::error::{ExecutorError, ManagerError};
use crate::executor::{ExecutorContext, ExecutorRegistry};
use crate::manager::WorkOrderManager;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub orders_seen: usize,
    pub orders_closed: usize,
    /// Open orders holding a `FAILED` task. They never close on their own.
    pub orders_stuck: usize,
    pub tasks_started: usize,
    pub tasks_polled: usize,
    pub errors: usize,
}

pub struct Reconciler {
    manager: WorkOrderManager,
    registry: Arc<ExecutorRegistry>,
    context: ExecutorContext,
    call_timeout: Option<Duration>,
}

impl Reconciler {
    pub fn new(
        manager: WorkOrderManager,
        registry: Arc<ExecutorRegistry>,
        context: ExecutorContext,
    ) -> Self {
        Self {
            manager,
            registry,
            context,
            call_timeout: None,
        }
    }

    /// Bound each `start` / `poll` call. Unbounded by default.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Run one pass. Only a failure to list open orders aborts the tick.
    pub async fn tick(&self) -> Result<TickReport, ManagerError> {
        let orders = self.manager.get_open_work_orders().await?;
        let mut report = TickReport {
            orders_seen: orders.len(),
            ..TickReport::default()
        };

        for order in &orders {
            self.reconcile_order(order, &mut report).await;
        }

        debug!(?report, "tick finished");
        Ok(report)
    }

    async fn reconcile_order(&self, order: &WorkOrder, report: &mut TickReport) {
        if order.all_tasks_completed() {
            match self
                .manager
                .update_work_order(&order.id, WorkOrderStatus::Closed)
                .await
            {
                Ok(_) => {
                    info!(work_order_id = %order.id, "all tasks done, work order closed");
                    report.orders_closed += 1;
                }
                Err(e) => {
                    error!(work_order_id = %order.id, error = %e, "failed to close work order");
                    report.errors += 1;
                }
            }
            return;
        }

        if order.is_stuck() {
            let failed: Vec<&str> = order
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .map(|t| t.task_type.as_str())
                .collect();
            warn!(
                work_order_id = %order.id,
                failed_tasks = ?failed,
                "work order is stuck on failed tasks"
            );
            report.orders_stuck += 1;
        }

        for task in &order.tasks {
            match task.status {
                TaskStatus::Pending if order.dependencies_met(task) => {
                    self.start_task(order, task, report).await;
                }
                TaskStatus::InProgress => self.poll_task(order, task, report).await,
                _ => {}
            }
        }
    }

    async fn start_task(&self, order: &WorkOrder, task: &Task, report: &mut TickReport) {
        let Some(entry) = self.registry.get(&task.task_type) else {
            error!(
                work_order_id = %order.id,
                task_type = %task.task_type,
                "no executor registered for task type"
            );
            report.errors += 1;
            return;
        };

        info!(work_order_id = %order.id, task_type = %task.task_type, "starting task");
        match self
            .bounded(entry.starter().start(&self.context, order, task))
            .await
        {
            Ok(()) => report.tasks_started += 1,
            Err(e) => {
                error!(
                    work_order_id = %order.id,
                    task_type = %task.task_type,
                    error = %e,
                    "failed to start task, retrying next tick"
                );
                report.errors += 1;
            }
        }
    }

    async fn poll_task(&self, order: &WorkOrder, task: &Task, report: &mut TickReport) {
        let Some(poller) = self.registry.get(&task.task_type).and_then(|e| e.poller()) else {
            return;
        };

        match self.bounded(poller.poll(&self.context, order, task)).await {
            Ok(()) => report.tasks_polled += 1,
            Err(e) => {
                error!(
                    work_order_id = %order.id,
                    task_type = %task.task_type,
                    error = %e,
                    "failed to poll task"
                );
                report.errors += 1;
            }
        }
    }

    async fn bounded<F>(&self, call: F) -> Result<(), ExecutorError>
    where
        F: Future<Output = Result<(), ExecutorError>>,
    {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ExecutorError::Timeout(limit))?,
            None => call.await,
        }
    }
}
