//! Work order manager: the only component that mutates stored state.
//!
//! Every mutation is a read-modify-write on one order, committed with
//! `compare_and_put` against the revision that was read. A conflicting
//! writer (a reconciler tick racing a callback) makes the loser re-read and
//! re-apply, so no update is lost. Orders with different ids never contend.
//!
//! # Guards
//! - task status moves only along `PENDING -> IN_PROGRESS -> {COMPLETED, FAILED}`
//!   (rewriting the current status is allowed)
//! - `PENDING -> IN_PROGRESS` requires every dependency to be `COMPLETED`
//! - a `CLOSED` order is never reopened
//!
//! A rejected update leaves the stored order untouched.
//!
//! # Thread Safety
//! `WorkOrderManager` is `Clone` and cheap to share; clones use the same
//! store. Safe under any number of concurrent callers as long as the store
//! implements `compare_and_put` atomically.
//!
//! # Example
//! ```ignore
//! let manager = WorkOrderManager::new(Arc::new(InMemoryWorkOrderStore::new()), Arc::new(SystemClock));
//! let order = manager.create_work_order(id, source, &template).await?;
//! manager
//!     .update_work_order_task(&order.id, &TaskType::new("ABR_TRANSCODE"), TaskStatus::InProgress, None)
//!     .await?;
//! ```

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::domain::{
    Task, TaskStatus, TaskType, WorkOrder, WorkOrderId, WorkOrderStatus, validate_template,
};
use crate::error::ManagerError;
use crate::ports::{Clock, WorkOrderStore};

pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 16;

/// Result of applying a mutation to a freshly read order.
enum Change {
    Write,
    Unchanged,
    NotFound,
}

/// Create, read, update and delete work orders and their tasks.
///
/// The reconciler, the callback ingestor and executors all write through
/// this type; nothing else calls the store's write methods.
#[derive(Clone)]
pub struct WorkOrderManager {
    store: Arc<dyn WorkOrderStore>,
    clock: Arc<dyn Clock>,
    max_write_attempts: u32,
}

impl WorkOrderManager {
    pub fn new(store: Arc<dyn WorkOrderStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }

    /// Values below 1 are treated as 1.
    pub fn with_max_write_attempts(mut self, attempts: u32) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    /// The backing store, for read paths that bypass the manager (CLI, tests).
    pub fn store(&self) -> &Arc<dyn WorkOrderStore> {
        &self.store
    }

    /// Build an `OPEN` order from `template` and persist it.
    ///
    /// Fails with `StoreError::AlreadyExists` if `id` is taken.
    pub async fn create_work_order(
        &self,
        id: WorkOrderId,
        source: Url,
        template: &[Task],
    ) -> Result<WorkOrder, ManagerError> {
        validate_template(template)?;
        let order = WorkOrder::new(id, source, template, self.clock.now());
        self.store.create(&order).await?;
        info!(
            work_order_id = %order.id,
            source = %order.source,
            tasks = order.tasks.len(),
            "work order created"
        );
        Ok(order)
    }

    pub async fn get_work_order(&self, id: &WorkOrderId) -> Result<Option<WorkOrder>, ManagerError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn get_open_work_orders(&self) -> Result<Vec<WorkOrder>, ManagerError> {
        Ok(self.store.list_open().await?)
    }

    pub async fn get_work_order_task(
        &self,
        id: &WorkOrderId,
        task_type: &TaskType,
    ) -> Result<Option<Task>, ManagerError> {
        Ok(self
            .store
            .get(id)
            .await?
            .and_then(|order| order.task(task_type).cloned()))
    }

    /// Set the order-level status. `None` if the order does not exist.
    ///
    /// A closed order cannot be reopened.
    pub async fn update_work_order(
        &self,
        id: &WorkOrderId,
        status: WorkOrderStatus,
    ) -> Result<Option<WorkOrder>, ManagerError> {
        let updated = self
            .modify(id, |order| {
                if order.status == status {
                    return Ok(Change::Unchanged);
                }
                if order.status == WorkOrderStatus::Closed {
                    return Err(ManagerError::Reopen(order.id.clone()));
                }
                order.status = status;
                Ok(Change::Write)
            })
            .await?;
        if let Some(order) = &updated {
            debug!(work_order_id = %order.id, status = %order.status, "work order status written");
        }
        Ok(updated)
    }

    /// Set one task's status and, when given, replace its payload.
    ///
    /// `None` if the order or the task does not exist. Illegal transitions
    /// fail with `InvalidTransition`, and starting a task whose dependencies
    /// are not all `COMPLETED` fails with `DependenciesNotMet`; both leave
    /// the order untouched.
    pub async fn update_work_order_task(
        &self,
        id: &WorkOrderId,
        task_type: &TaskType,
        status: TaskStatus,
        payload: Option<Value>,
    ) -> Result<Option<WorkOrder>, ManagerError> {
        let mut previous = None;
        let updated = self
            .modify(id, |order| {
                previous = None;
                let order_id = order.id.clone();
                let Some(current) = order.task(task_type) else {
                    return Ok(Change::NotFound);
                };
                if current.status == TaskStatus::Pending && status == TaskStatus::InProgress {
                    let waiting = order.unmet_dependencies(current);
                    if !waiting.is_empty() {
                        return Err(ManagerError::DependenciesNotMet {
                            id: order_id,
                            task_type: task_type.clone(),
                            waiting,
                        });
                    }
                }
                let Some(task) = order.task_mut(task_type) else {
                    return Ok(Change::NotFound);
                };
                if !task.status.can_transition_to(status) {
                    return Err(ManagerError::InvalidTransition {
                        id: order_id,
                        task_type: task_type.clone(),
                        from: task.status,
                        to: status,
                    });
                }
                let payload_changes = payload.as_ref().is_some_and(|p| task.payload.as_ref() != Some(p));
                if task.status == status && !payload_changes {
                    return Ok(Change::Unchanged);
                }
                previous = Some(task.status);
                task.status = status;
                if let Some(p) = &payload {
                    task.payload = Some(p.clone());
                }
                Ok(Change::Write)
            })
            .await?;

        if let (Some(order), Some(from)) = (&updated, previous)
            && from != status
        {
            info!(
                work_order_id = %order.id,
                task_type = %task_type,
                %from,
                to = %status,
                "task status changed"
            );
        }
        Ok(updated)
    }

    pub async fn delete_work_order(&self, id: &WorkOrderId) -> Result<bool, ManagerError> {
        let removed = self.store.delete(id).await?;
        if removed {
            info!(work_order_id = %id, "work order deleted");
        }
        Ok(removed)
    }

    /// Optimistic read-modify-write. `apply` runs again on every conflict,
    /// against the freshly read order.
    async fn modify<F>(&self, id: &WorkOrderId, mut apply: F) -> Result<Option<WorkOrder>, ManagerError>
    where
        F: FnMut(&mut WorkOrder) -> Result<Change, ManagerError> + Send,
    {
        for attempt in 1..=self.max_write_attempts {
            let Some(mut order) = self.store.get(id).await? else {
                return Ok(None);
            };
            let expected = order.revision;
            match apply(&mut order)? {
                Change::Unchanged => return Ok(Some(order)),
                Change::NotFound => return Ok(None),
                Change::Write => {}
            }
            order.revision = expected + 1;
            order.touch(self.clock.now());
            if self.store.compare_and_put(&order, expected).await? {
                return Ok(Some(order));
            }
            debug!(work_order_id = %id, attempt, "concurrent write detected, retrying");
        }
        Err(ManagerError::Contention {
            id: id.clone(),
            attempts: self.max_write_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::impls::InMemoryWorkOrderStore;
    use crate::ports::FixedClock;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn t(name: &str) -> TaskType {
        TaskType::new(name)
    }

    fn template() -> Vec<Task> {
        vec![
            Task::pending(t("ABR_TRANSCODE"), vec![]),
            Task::pending(t("TRANSCRIBE"), vec![]),
            Task::pending(t("VOD_PACKAGE"), vec![t("ABR_TRANSCODE"), t("TRANSCRIBE")]),
        ]
    }

    fn source() -> Url {
        Url::parse("s3://input/movie.mp4").unwrap()
    }

    fn setup() -> (WorkOrderManager, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ));
        let manager = WorkOrderManager::new(Arc::new(InMemoryWorkOrderStore::new()), clock.clone());
        (manager, clock)
    }

    #[tokio::test]
    async fn create_and_read_back() {
        let (manager, _) = setup();
        let id = WorkOrderId::new("movie-abcde");
        let created = manager
            .create_work_order(id.clone(), source(), &template())
            .await
            .unwrap();

        assert_eq!(manager.get_work_order(&id).await.unwrap(), Some(created));
        assert_eq!(manager.get_open_work_orders().await.unwrap().len(), 1);
        let task = manager
            .get_work_order_task(&id, &t("VOD_PACKAGE"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(
            manager
                .get_work_order_task(&id, &t("CLEANUP"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn create_fails_on_existing_id_and_bad_template() {
        let (manager, _) = setup();
        let id = WorkOrderId::new("dup");
        manager.create_work_order(id.clone(), source(), &template()).await.unwrap();

        let err = manager
            .create_work_order(id, source(), &template())
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Store(StoreError::AlreadyExists(_))));

        let err = manager
            .create_work_order(WorkOrderId::new("empty"), source(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Template(_)));
    }

    #[tokio::test]
    async fn task_update_sets_payload_and_refreshes_updated_at() {
        let (manager, clock) = setup();
        let id = WorkOrderId::new("a");
        let created = manager.create_work_order(id.clone(), source(), &template()).await.unwrap();

        clock.advance(chrono::Duration::seconds(5));
        let updated = manager
            .update_work_order_task(
                &id,
                &t("ABR_TRANSCODE"),
                TaskStatus::InProgress,
                Some(json!({"jobId": "job-1"})),
            )
            .await
            .unwrap()
            .unwrap();

        let task = updated.task(&t("ABR_TRANSCODE")).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.payload, Some(json!({"jobId": "job-1"})));
        assert_eq!(updated.updated_at, created.updated_at + chrono::Duration::seconds(5));
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.revision, 1);
    }

    #[tokio::test]
    async fn status_only_update_keeps_payload() {
        let (manager, _) = setup();
        let id = WorkOrderId::new("a");
        manager.create_work_order(id.clone(), source(), &template()).await.unwrap();
        let tt = t("ABR_TRANSCODE");
        manager
            .update_work_order_task(&id, &tt, TaskStatus::InProgress, Some(json!({"jobId": "j"})))
            .await
            .unwrap();
        let order = manager
            .update_work_order_task(&id, &tt, TaskStatus::Completed, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.task(&tt).unwrap().payload, Some(json!({"jobId": "j"})));
    }

    #[tokio::test]
    async fn unchanged_update_does_not_write() {
        let (manager, clock) = setup();
        let id = WorkOrderId::new("a");
        let created = manager.create_work_order(id.clone(), source(), &template()).await.unwrap();

        clock.advance(chrono::Duration::seconds(5));
        let same = manager
            .update_work_order_task(&id, &t("TRANSCRIBE"), TaskStatus::Pending, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(same, created);
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let (manager, _) = setup();
        let id = WorkOrderId::new("a");
        manager.create_work_order(id.clone(), source(), &template()).await.unwrap();
        let tt = t("ABR_TRANSCODE");

        let err = manager
            .update_work_order_task(&id, &tt, TaskStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ManagerError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed,
                ..
            }
        ));

        manager.update_work_order_task(&id, &tt, TaskStatus::InProgress, None).await.unwrap();
        manager.update_work_order_task(&id, &tt, TaskStatus::Completed, None).await.unwrap();

        // A stale poll must not drag a completed task backwards.
        let err = manager
            .update_work_order_task(&id, &tt, TaskStatus::InProgress, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::InvalidTransition { .. }));
        let task = manager.get_work_order_task(&id, &tt).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn task_cannot_start_before_its_dependencies_complete() {
        let (manager, _) = setup();
        let id = WorkOrderId::new("a");
        manager.create_work_order(id.clone(), source(), &template()).await.unwrap();
        let package = t("VOD_PACKAGE");

        let err = manager
            .update_work_order_task(&id, &package, TaskStatus::InProgress, None)
            .await
            .unwrap_err();
        match err {
            ManagerError::DependenciesNotMet { task_type, waiting, .. } => {
                assert_eq!(task_type, package);
                assert_eq!(waiting, vec![t("ABR_TRANSCODE"), t("TRANSCRIBE")]);
            }
            other => panic!("expected DependenciesNotMet, got {other:?}"),
        }

        for dep in ["ABR_TRANSCODE", "TRANSCRIBE"] {
            manager.update_work_order_task(&id, &t(dep), TaskStatus::InProgress, None).await.unwrap();
        }
        manager
            .update_work_order_task(&id, &t("ABR_TRANSCODE"), TaskStatus::Completed, None)
            .await
            .unwrap();
        let err = manager
            .update_work_order_task(&id, &package, TaskStatus::InProgress, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ManagerError::DependenciesNotMet { ref waiting, .. } if *waiting == vec![t("TRANSCRIBE")]
        ));
        assert_eq!(
            manager.get_work_order_task(&id, &package).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );

        manager
            .update_work_order_task(&id, &t("TRANSCRIBE"), TaskStatus::Completed, None)
            .await
            .unwrap();
        let order = manager
            .update_work_order_task(&id, &package, TaskStatus::InProgress, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.task(&package).unwrap().status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn updates_on_missing_order_or_task_are_no_ops() {
        let (manager, _) = setup();
        let ghost = WorkOrderId::new("ghost");
        assert!(
            manager
                .update_work_order(&ghost, WorkOrderStatus::Closed)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            manager
                .update_work_order_task(&ghost, &t("A"), TaskStatus::InProgress, None)
                .await
                .unwrap()
                .is_none()
        );

        let id = WorkOrderId::new("a");
        manager.create_work_order(id.clone(), source(), &template()).await.unwrap();
        assert!(
            manager
                .update_work_order_task(&id, &t("CLEANUP"), TaskStatus::InProgress, None)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(manager.get_work_order(&id).await.unwrap().unwrap().revision, 0);
    }

    #[tokio::test]
    async fn closing_is_terminal_and_delete_reports_presence() {
        let (manager, _) = setup();
        let id = WorkOrderId::new("a");
        manager.create_work_order(id.clone(), source(), &template()).await.unwrap();

        let closed = manager
            .update_work_order(&id, WorkOrderStatus::Closed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.status, WorkOrderStatus::Closed);
        assert!(manager.get_open_work_orders().await.unwrap().is_empty());

        let err = manager
            .update_work_order(&id, WorkOrderStatus::Open)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Reopen(_)));

        assert!(manager.delete_work_order(&id).await.unwrap());
        assert!(!manager.delete_work_order(&id).await.unwrap());
    }

    /// Lets another writer commit between the manager's read and its write,
    /// exactly once.
    struct InterferingStore {
        inner: InMemoryWorkOrderStore,
        interfered: AtomicBool,
        task_type: TaskType,
    }

    #[async_trait]
    impl WorkOrderStore for InterferingStore {
        async fn create(&self, order: &WorkOrder) -> Result<(), StoreError> {
            self.inner.create(order).await
        }

        async fn get(&self, id: &WorkOrderId) -> Result<Option<WorkOrder>, StoreError> {
            self.inner.get(id).await
        }

        async fn list_open(&self) -> Result<Vec<WorkOrder>, StoreError> {
            self.inner.list_open().await
        }

        async fn put(&self, order: &WorkOrder) -> Result<(), StoreError> {
            self.inner.put(order).await
        }

        async fn compare_and_put(
            &self,
            order: &WorkOrder,
            expected_revision: u64,
        ) -> Result<bool, StoreError> {
            if !self.interfered.swap(true, Ordering::SeqCst) {
                let mut other = self.inner.get(&order.id).await?.unwrap();
                other.task_mut(&self.task_type).unwrap().status = TaskStatus::InProgress;
                other.revision += 1;
                self.inner.put(&other).await?;
            }
            self.inner.compare_and_put(order, expected_revision).await
        }

        async fn delete(&self, id: &WorkOrderId) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn conflicting_write_is_retried_without_losing_either_update() {
        let store = Arc::new(InterferingStore {
            inner: InMemoryWorkOrderStore::new(),
            interfered: AtomicBool::new(true),
            task_type: t("TRANSCRIBE"),
        });
        let manager = WorkOrderManager::new(store.clone(), Arc::new(FixedClock::new(Utc::now())));
        let id = WorkOrderId::new("race");
        manager.create_work_order(id.clone(), source(), &template()).await.unwrap();

        store.interfered.store(false, Ordering::SeqCst);
        let order = manager
            .update_work_order_task(&id, &t("ABR_TRANSCODE"), TaskStatus::InProgress, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(order.task(&t("ABR_TRANSCODE")).unwrap().status, TaskStatus::InProgress);
        assert_eq!(order.task(&t("TRANSCRIBE")).unwrap().status, TaskStatus::InProgress);
        assert_eq!(order.revision, 2);
        assert_eq!(manager.get_work_order(&id).await.unwrap(), Some(order));
    }

    struct AlwaysConflicting(InMemoryWorkOrderStore);

    #[async_trait]
    impl WorkOrderStore for AlwaysConflicting {
        async fn create(&self, order: &WorkOrder) -> Result<(), StoreError> {
            self.0.create(order).await
        }

        async fn get(&self, id: &WorkOrderId) -> Result<Option<WorkOrder>, StoreError> {
            self.0.get(id).await
        }

        async fn list_open(&self) -> Result<Vec<WorkOrder>, StoreError> {
            self.0.list_open().await
        }

        async fn put(&self, order: &WorkOrder) -> Result<(), StoreError> {
            self.0.put(order).await
        }

        async fn compare_and_put(&self, _: &WorkOrder, _: u64) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn delete(&self, id: &WorkOrderId) -> Result<bool, StoreError> {
            self.0.delete(id).await
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_write_attempts() {
        let manager = WorkOrderManager::new(
            Arc::new(AlwaysConflicting(InMemoryWorkOrderStore::new())),
            Arc::new(FixedClock::new(Utc::now())),
        )
        .with_max_write_attempts(3);
        let id = WorkOrderId::new("busy");
        manager.create_work_order(id.clone(), source(), &template()).await.unwrap();

        let err = manager
            .update_work_order(&id, WorkOrderStatus::Closed)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Contention { attempts: 3, .. }));
    }
}
