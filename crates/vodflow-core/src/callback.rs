//! Callback ingestor: applies out-of-band job completion notifications.
//!
//! Each callback source (one per remote service) is bound to the task type
//! it completes and to a resolver that turns a notification into a work
//! order id, a status string and a result payload. Nothing here returns an
//! error to the notification sender; every outcome is reported as an
//! `IngestOutcome` and drops are logged.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::domain::{TaskStatus, TaskType, WorkOrderId};
use crate::error::{ExecutorError, ManagerError};
use crate::manager::WorkOrderManager;

/// Inbound notification as posted by a remote job service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackNotification {
    #[serde(default)]
    pub job_id: Option<String>,

    /// Status or event string, e.g. `SUCCESSFUL`, `SUBTITLING_COMPLETED`.
    #[serde(default, alias = "status")]
    pub event: Option<String>,

    /// Correlation id; equal to the work-order id when present.
    #[serde(default)]
    pub external_id: Option<String>,

    /// The raw notification document.
    #[serde(default)]
    pub body: Value,
}

impl CallbackNotification {
    /// Build from a raw JSON document, keeping the document as `body`.
    pub fn from_document(document: Value) -> Self {
        let field = |name: &str| document.get(name).and_then(Value::as_str).map(str::to_string);
        Self {
            job_id: field("jobId"),
            event: field("event").or_else(|| field("status")),
            external_id: field("externalId"),
            body: document,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Completed,
    Failed,
    Ignored,
}

/// Case-insensitive classification of service-specific status strings.
#[derive(Debug, Clone)]
pub struct StatusMapping {
    completed: HashSet<String>,
    failed: HashSet<String>,
}

impl Default for StatusMapping {
    fn default() -> Self {
        Self::empty()
            .with_completed([
                "SUCCESSFUL",
                "COMPLETED",
                "SUBTITLING_COMPLETED",
                "COMPLETE",
                "SUCCESSCRITERIAMET",
            ])
            .with_failed(["FAILED", "ERROR", "SUBTITLING_FAILED"])
    }
}

impl StatusMapping {
    pub fn empty() -> Self {
        Self {
            completed: HashSet::new(),
            failed: HashSet::new(),
        }
    }

    pub fn with_completed<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.completed
            .extend(statuses.into_iter().map(|s| s.as_ref().to_uppercase()));
        self
    }

    pub fn with_failed<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.failed
            .extend(statuses.into_iter().map(|s| s.as_ref().to_uppercase()));
        self
    }

    pub fn classify(&self, status: &str) -> CallbackStatus {
        let status = status.trim().to_uppercase();
        if self.completed.contains(&status) {
            CallbackStatus::Completed
        } else if self.failed.contains(&status) {
            CallbackStatus::Failed
        } else {
            CallbackStatus::Ignored
        }
    }
}

/// A notification resolved to the order it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedJob {
    pub work_order_id: WorkOrderId,
    /// Final job status; falls back to the notification's event when `None`.
    pub status: Option<String>,
    pub payload: Value,
}

#[async_trait]
pub trait CallbackResolver: Send + Sync {
    /// `Ok(None)` when the notification lacks what is needed to resolve it.
    async fn resolve(
        &self,
        notification: &CallbackNotification,
    ) -> Result<Option<ResolvedJob>, ExecutorError>;
}

/// The notification carries the work-order id itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelatedCallbackResolver;

#[async_trait]
impl CallbackResolver for CorrelatedCallbackResolver {
    async fn resolve(
        &self,
        notification: &CallbackNotification,
    ) -> Result<Option<ResolvedJob>, ExecutorError> {
        Ok(notification.external_id.as_deref().map(|id| ResolvedJob {
            work_order_id: WorkOrderId::new(id),
            status: notification.event.clone(),
            payload: notification.body.clone(),
        }))
    }
}

/// Full job details fetched from the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDetails {
    pub external_id: Option<String>,
    pub status: Option<String>,
    pub document: Value,
}

/// Fetches a job by its service-side id.
#[async_trait]
pub trait JobLookup: Send + Sync {
    async fn fetch_job(&self, job_id: &str) -> Result<Option<JobDetails>, ExecutorError>;
}

/// The notification only names the job; the work-order id is the job's
/// external id and the payload is the fetched job document.
#[derive(Debug, Clone)]
pub struct LookupCallbackResolver<L> {
    lookup: L,
}

impl<L: JobLookup> LookupCallbackResolver<L> {
    pub fn new(lookup: L) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl<L: JobLookup> CallbackResolver for LookupCallbackResolver<L> {
    async fn resolve(
        &self,
        notification: &CallbackNotification,
    ) -> Result<Option<ResolvedJob>, ExecutorError> {
        let Some(job_id) = notification.job_id.as_deref() else {
            return Ok(None);
        };
        let Some(job) = self.lookup.fetch_job(job_id).await? else {
            debug!(job_id, "job not found at remote service");
            return Ok(None);
        };
        let Some(external_id) = job.external_id else {
            warn!(job_id, "job has no external id");
            return Ok(None);
        };
        Ok(Some(ResolvedJob {
            work_order_id: WorkOrderId::new(external_id),
            status: job.status,
            payload: job.document,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The task status was written.
    Applied {
        work_order_id: WorkOrderId,
        status: TaskStatus,
    },
    /// A progress or otherwise non-terminal event.
    Ignored,
    /// Resolved to an order (or task) that does not exist. Nothing changed.
    UnknownWorkOrder(WorkOrderId),
    /// Malformed, unresolvable, or rejected. Logged, nothing changed.
    Dropped,
}

struct CallbackSource {
    task_type: TaskType,
    resolver: Arc<dyn CallbackResolver>,
    mapping: StatusMapping,
}

#[derive(Clone)]
pub struct CallbackIngestor {
    manager: WorkOrderManager,
    sources: Arc<HashMap<String, CallbackSource>>,
}

/// Collects callback sources before the ingestor is shared.
pub struct CallbackIngestorBuilder {
    manager: WorkOrderManager,
    sources: HashMap<String, CallbackSource>,
}

impl CallbackIngestorBuilder {
    /// Bind `name` (e.g. `"encore"`) to the task type its callbacks complete.
    pub fn source<R>(
        mut self,
        name: impl Into<String>,
        task_type: TaskType,
        resolver: R,
        mapping: StatusMapping,
    ) -> Self
    where
        R: CallbackResolver + 'static,
    {
        self.sources.insert(
            name.into(),
            CallbackSource {
                task_type,
                resolver: Arc::new(resolver),
                mapping,
            },
        );
        self
    }

    pub fn build(self) -> CallbackIngestor {
        CallbackIngestor {
            manager: self.manager,
            sources: Arc::new(self.sources),
        }
    }
}

impl CallbackIngestor {
    pub fn builder(manager: WorkOrderManager) -> CallbackIngestorBuilder {
        CallbackIngestorBuilder {
            manager,
            sources: HashMap::new(),
        }
    }

    pub async fn ingest(&self, source: &str, notification: &CallbackNotification) -> IngestOutcome {
        let Some(src) = self.sources.get(source) else {
            warn!(source, "callback from unknown source dropped");
            return IngestOutcome::Dropped;
        };

        // Progress events are dropped before any remote lookup.
        if let Some(event) = notification.event.as_deref()
            && src.mapping.classify(event) == CallbackStatus::Ignored
        {
            debug!(source, event, job_id = ?notification.job_id, "non-terminal callback ignored");
            return IngestOutcome::Ignored;
        }

        let resolved = match src.resolver.resolve(notification).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                warn!(source, job_id = ?notification.job_id, "unresolvable callback dropped");
                return IngestOutcome::Dropped;
            }
            Err(e) => {
                warn!(source, job_id = ?notification.job_id, error = %e, "callback resolution failed");
                return IngestOutcome::Dropped;
            }
        };

        let Some(raw_status) = resolved.status.as_deref().or(notification.event.as_deref()) else {
            warn!(source, work_order_id = %resolved.work_order_id, "callback without status dropped");
            return IngestOutcome::Dropped;
        };
        let status = match src.mapping.classify(raw_status) {
            CallbackStatus::Completed => TaskStatus::Completed,
            CallbackStatus::Failed => TaskStatus::Failed,
            CallbackStatus::Ignored => return IngestOutcome::Ignored,
        };

        self.apply(source, &src.task_type, resolved, status).await
    }

    async fn apply(
        &self,
        source: &str,
        task_type: &TaskType,
        resolved: ResolvedJob,
        status: TaskStatus,
    ) -> IngestOutcome {
        let id = resolved.work_order_id;
        let payload = Some(resolved.payload);

        let mut result = self
            .manager
            .update_work_order_task(&id, task_type, status, payload.clone())
            .await;

        // The job can finish before `start` has recorded IN_PROGRESS; the
        // callback itself proves the job was started. The IN_PROGRESS write
        // still requires every dependency to be COMPLETED, so a callback for
        // a task that could not have been started yet is rejected.
        if let Err(ManagerError::InvalidTransition {
            from: TaskStatus::Pending,
            ..
        }) = result
        {
            debug!(work_order_id = %id, task_type = %task_type, "callback overtook start");
            result = match self
                .manager
                .update_work_order_task(&id, task_type, TaskStatus::InProgress, None)
                .await
            {
                Ok(_) => {
                    self.manager
                        .update_work_order_task(&id, task_type, status, payload)
                        .await
                }
                Err(e) => Err(e),
            };
        }

        match result {
            Ok(Some(_)) => {
                info!(source, work_order_id = %id, task_type = %task_type, %status, "callback applied");
                IngestOutcome::Applied {
                    work_order_id: id,
                    status,
                }
            }
            Ok(None) => {
                info!(source, work_order_id = %id, task_type = %task_type, "callback for unknown work order");
                IngestOutcome::UnknownWorkOrder(id)
            }
            Err(e @ (ManagerError::InvalidTransition { .. } | ManagerError::DependenciesNotMet { .. })) => {
                warn!(source, work_order_id = %id, error = %e, "callback rejected");
                IngestOutcome::Dropped
            }
            Err(e) => {
                error!(source, work_order_id = %id, error = %e, "failed to apply callback");
                IngestOutcome::Dropped
            }
        }
    }
}
