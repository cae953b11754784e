//! Task executor registry.
//!
//! A lookup table from task type to `start` and an optional `poll`. Concrete
//! executors (transcode, package, transcribe, cleanup) live outside the core
//! and are registered once at startup.
//!
//! # Design
//! - built mutable during startup, shared immutable (`Arc`) afterwards, so
//!   lookups take no lock
//! - one entry per task type; registering a type twice is an error
//! - `ensure_covers` is checked against the workflow before the loop starts
//!
//! Executors never touch the store directly. They report through the
//! `ExecutorContext`, which routes every write through the manager.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::domain::{Task, TaskStatus, TaskType, WorkOrder, WorkOrderId};
use crate::error::{ExecutorError, RegistryError};
use crate::manager::WorkOrderManager;
use crate::ports::CredentialProvider;

/// Starts the remote job for a `PENDING` task whose dependencies are complete.
///
/// On success it must move the task to `IN_PROGRESS` itself (usually via
/// `ExecutorContext::mark_started`). On a retriable failure it returns an
/// error and leaves the task `PENDING`; the next tick tries again. A
/// non-retriable failure goes through `ExecutorContext::reject_task`.
///
/// Calls may be repeated after a crash or a transient error, so remote
/// services should deduplicate on the work-order id where they can.
#[async_trait]
pub trait TaskStarter: Send + Sync {
    async fn start(
        &self,
        ctx: &ExecutorContext,
        order: &WorkOrder,
        task: &Task,
    ) -> Result<(), ExecutorError>;
}

/// Inspects the remote job of an `IN_PROGRESS` task and records
/// `COMPLETED` or `FAILED` once the job has finished.
///
/// Only for task types whose completion is discovered by polling; the rest
/// are advanced by callbacks.
#[async_trait]
pub trait TaskPoller: Send + Sync {
    async fn poll(
        &self,
        ctx: &ExecutorContext,
        order: &WorkOrder,
        task: &Task,
    ) -> Result<(), ExecutorError>;
}

#[derive(Clone)]
/// What the registry holds for one task type: a starter, and a poller when
/// the type's completion is discovered by polling.
pub struct ExecutorEntry {
    starter: Arc<dyn TaskStarter>,
    poller: Option<Arc<dyn TaskPoller>>,
}

impl ExecutorEntry {
    pub fn starter(&self) -> &Arc<dyn TaskStarter> {
        &self.starter
    }

    pub fn poller(&self) -> Option<&Arc<dyn TaskPoller>> {
        self.poller.as_ref()
    }
}

impl fmt::Debug for ExecutorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorEntry")
            .field("polls", &self.poller.is_some())
            .finish()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ExecutorRegistry {
    entries: HashMap<TaskType, ExecutorEntry>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback-driven task type (no polling).
    pub fn register<S>(&mut self, task_type: TaskType, starter: S) -> Result<(), RegistryError>
    where
        S: TaskStarter + 'static,
    {
        self.insert(task_type, Arc::new(starter), None)
    }

    /// Register a task type whose completion is discovered by polling.
    pub fn register_with_poll<S, P>(
        &mut self,
        task_type: TaskType,
        starter: S,
        poller: P,
    ) -> Result<(), RegistryError>
    where
        S: TaskStarter + 'static,
        P: TaskPoller + 'static,
    {
        self.insert(task_type, Arc::new(starter), Some(Arc::new(poller)))
    }

    fn insert(
        &mut self,
        task_type: TaskType,
        starter: Arc<dyn TaskStarter>,
        poller: Option<Arc<dyn TaskPoller>>,
    ) -> Result<(), RegistryError> {
        if self.entries.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.entries
            .insert(task_type, ExecutorEntry { starter, poller });
        Ok(())
    }

    /// `None` when no executor is registered for `task_type`; the reconciler
    /// logs that as an error for the task and moves on.
    pub fn get(&self, task_type: &TaskType) -> Option<&ExecutorEntry> {
        self.entries.get(task_type)
    }

    /// Registered types, sorted.
    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.entries.keys().cloned().collect();
        types.sort();
        types
    }

    /// Fail fast when the workflow declares a type nobody can start.
    pub fn ensure_covers(&self, template: &[Task]) -> Result<(), RegistryError> {
        let missing: Vec<TaskType> = template
            .iter()
            .map(|t| &t.task_type)
            .filter(|t| !self.entries.contains_key(*t))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::MissingTaskTypes(missing))
        }
    }
}

/// Process-wide settings handed to every executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExecutorSettings {
    /// Base URL remote services use to reach our callback endpoints.
    #[serde(default)]
    pub public_base_url: Option<Url>,

    /// Remote service endpoints by name (`encore`, `subtitle_generator`, ...).
    #[serde(default)]
    pub endpoints: BTreeMap<String, Url>,

    /// Free-form executor parameters (bucket names, profiles, ...).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ExecutorSettings {
    pub fn endpoint(&self, name: &str) -> Result<&Url, ExecutorError> {
        self.endpoints
            .get(name)
            .ok_or_else(|| ExecutorError::Remote(format!("no endpoint configured for {name}")))
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// `<public_base_url>/<path>`, keeping any path prefix of the base.
    pub fn callback_url(&self, path: &str) -> Result<Url, ExecutorError> {
        let base = self
            .public_base_url
            .as_ref()
            .ok_or_else(|| ExecutorError::Remote("public base url is not configured".to_string()))?;
        let joined = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| ExecutorError::Remote(format!("callback url {joined}: {e}")))
    }
}

/// Everything an executor may touch: the manager (its only write path),
/// settings, and the explicitly passed credential provider.
#[derive(Clone)]
pub struct ExecutorContext {
    manager: WorkOrderManager,
    settings: Arc<ExecutorSettings>,
    credentials: Arc<dyn CredentialProvider>,
}

impl ExecutorContext {
    pub fn new(
        manager: WorkOrderManager,
        settings: Arc<ExecutorSettings>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            manager,
            settings,
            credentials,
        }
    }

    pub fn manager(&self) -> &WorkOrderManager {
        &self.manager
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub async fn access_token(&self, service: &str) -> Result<String, ExecutorError> {
        self.credentials.access_token(service).await
    }

    /// `PENDING -> IN_PROGRESS`, attaching what is needed to poll later.
    pub async fn mark_started(
        &self,
        order_id: &WorkOrderId,
        task_type: &TaskType,
        payload: Option<Value>,
    ) -> Result<(), ExecutorError> {
        self.manager
            .update_work_order_task(order_id, task_type, TaskStatus::InProgress, payload)
            .await?;
        Ok(())
    }

    /// `IN_PROGRESS -> COMPLETED | FAILED` with the job's final result.
    pub async fn finish(
        &self,
        order_id: &WorkOrderId,
        task_type: &TaskType,
        status: TaskStatus,
        payload: Option<Value>,
    ) -> Result<(), ExecutorError> {
        self.manager
            .update_work_order_task(order_id, task_type, status, payload)
            .await?;
        Ok(())
    }

    /// Non-retriable start failure: the task passes through `IN_PROGRESS`
    /// straight to `FAILED` and the order becomes stuck.
    pub async fn reject_task(
        &self,
        order_id: &WorkOrderId,
        task_type: &TaskType,
        reason: impl Into<String>,
    ) -> Result<(), ExecutorError> {
        let payload = serde_json::json!({ "error": reason.into() });
        self.manager
            .update_work_order_task(order_id, task_type, TaskStatus::InProgress, None)
            .await?;
        self.manager
            .update_work_order_task(order_id, task_type, TaskStatus::Failed, Some(payload))
            .await?;
        Ok(())
    }
}

impl fmt::Debug for ExecutorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryWorkOrderStore, StaticCredentials};
    use crate::ports::SystemClock;

    struct Noop;

    #[async_trait]
    impl TaskStarter for Noop {
        async fn start(&self, _: &ExecutorContext, _: &WorkOrder, _: &Task) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    #[async_trait]
    impl TaskPoller for Noop {
        async fn poll(&self, _: &ExecutorContext, _: &WorkOrder, _: &Task) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    fn t(name: &str) -> TaskType {
        TaskType::new(name)
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ExecutorRegistry::new();
        registry.register(t("ABR_TRANSCODE"), Noop).unwrap();
        registry
            .register_with_poll(t("VOD_PACKAGE"), Noop, Noop)
            .unwrap();

        assert!(registry.get(&t("ABR_TRANSCODE")).unwrap().poller().is_none());
        assert!(registry.get(&t("VOD_PACKAGE")).unwrap().poller().is_some());
        assert!(registry.get(&t("CLEANUP")).is_none());
        assert_eq!(
            registry.registered_types(),
            vec![t("ABR_TRANSCODE"), t("VOD_PACKAGE")]
        );
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = ExecutorRegistry::new();
        registry.register(t("CLEANUP"), Noop).unwrap();
        let err = registry.register_with_poll(t("CLEANUP"), Noop, Noop).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(tt) if tt == t("CLEANUP")));
    }

    #[test]
    fn ensure_covers_reports_missing_types() {
        let mut registry = ExecutorRegistry::new();
        registry.register(t("ABR_TRANSCODE"), Noop).unwrap();
        let template = [
            Task::pending(t("ABR_TRANSCODE"), vec![]),
            Task::pending(t("TRANSCRIBE"), vec![]),
        ];
        let err = registry.ensure_covers(&template).unwrap_err();
        assert!(matches!(err, RegistryError::MissingTaskTypes(m) if m == vec![t("TRANSCRIBE")]));

        registry.register(t("TRANSCRIBE"), Noop).unwrap();
        assert!(registry.ensure_covers(&template).is_ok());
    }

    #[test]
    fn callback_url_keeps_base_path() {
        let settings = ExecutorSettings {
            public_base_url: Some(Url::parse("https://vod.example.com/api/").unwrap()),
            ..Default::default()
        };
        assert_eq!(
            settings.callback_url("/encoreCallback").unwrap().as_str(),
            "https://vod.example.com/api/encoreCallback"
        );
        assert!(ExecutorSettings::default().callback_url("x").is_err());
        assert!(ExecutorSettings::default().endpoint("encore").is_err());
    }

    #[tokio::test]
    async fn reject_task_fails_a_pending_task() {
        let manager = WorkOrderManager::new(
            Arc::new(InMemoryWorkOrderStore::new()),
            Arc::new(SystemClock),
        );
        let ctx = ExecutorContext::new(
            manager.clone(),
            Arc::new(ExecutorSettings::default()),
            Arc::new(StaticCredentials::new()),
        );
        let id = WorkOrderId::new("movie-abcde");
        manager
            .create_work_order(
                id.clone(),
                Url::parse("s3://input/movie.mp4").unwrap(),
                &[Task::pending(t("ABR_TRANSCODE"), vec![])],
            )
            .await
            .unwrap();

        ctx.reject_task(&id, &t("ABR_TRANSCODE"), "unsupported codec")
            .await
            .unwrap();

        let order = manager.get_work_order(&id).await.unwrap().unwrap();
        let task = order.task(&t("ABR_TRANSCODE")).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.payload.as_ref().unwrap()["error"], "unsupported codec");
        assert!(order.is_stuck());
    }
}
