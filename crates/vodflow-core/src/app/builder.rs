//! OrchestratorBuilder - wiring and fail-fast startup checks.
//!
//! `build()` refuses to produce an orchestrator when:
//! - no workflow location is configured, or the definition cannot be loaded
//! - the workflow declares a task type with no registered executor
//! - the configured store cannot be reached

use std::sync::Arc;

use tracing::info;

use crate::app::Orchestrator;
use crate::config::OrchestratorConfig;
use crate::domain::TaskType;
use crate::error::{BuildError, RegistryError};
use crate::executor::{ExecutorContext, ExecutorRegistry, TaskPoller, TaskStarter};
use crate::impls::StaticCredentials;
use crate::manager::WorkOrderManager;
use crate::ports::{Clock, CredentialProvider, SlugIdGenerator, SystemClock, WorkOrderIdGenerator, WorkOrderStore};
use crate::reconciler::Reconciler;
use crate::workflow::{WorkflowLoader, WorkflowSource};

/// ```ignore
/// let orchestrator = OrchestratorBuilder::new(OrchestratorConfig::from_env()?)
///     .register(TaskType::new("ABR_TRANSCODE"), AbrTranscode)?
///     .register_with_poll(TaskType::new("VOD_PACKAGE"), VodPackage, VodPackage)?
///     .with_credentials(Arc::new(credentials))
///     .build()
///     .await?;
/// let handle = orchestrator.start();
/// ```
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    registry: ExecutorRegistry,
    store: Option<Arc<dyn WorkOrderStore>>,
    clock: Arc<dyn Clock>,
    credentials: Arc<dyn CredentialProvider>,
    ids: Arc<dyn WorkOrderIdGenerator>,
    http: Option<reqwest::Client>,
}

impl OrchestratorBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            registry: ExecutorRegistry::new(),
            store: None,
            clock: Arc::new(SystemClock),
            credentials: Arc::new(StaticCredentials::new()),
            ids: Arc::new(SlugIdGenerator),
            http: None,
        }
    }

    pub fn register<S>(mut self, task_type: TaskType, starter: S) -> Result<Self, RegistryError>
    where
        S: TaskStarter + 'static,
    {
        self.registry.register(task_type, starter)?;
        Ok(self)
    }

    pub fn register_with_poll<S, P>(
        mut self,
        task_type: TaskType,
        starter: S,
        poller: P,
    ) -> Result<Self, RegistryError>
    where
        S: TaskStarter + 'static,
        P: TaskPoller + 'static,
    {
        self.registry.register_with_poll(task_type, starter, poller)?;
        Ok(self)
    }

    /// Use this store instead of the one named in the configuration.
    pub fn with_store(mut self, store: Arc<dyn WorkOrderStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn WorkOrderIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// HTTP client used to fetch a remote workflow definition.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub async fn build(self) -> Result<Orchestrator, BuildError> {
        let source: WorkflowSource = self.config.require_workflow_location()?.parse()?;
        let loader = match self.http {
            Some(http) => WorkflowLoader::with_client(source, http),
            None => WorkflowLoader::new(source),
        };
        let template = loader.get_tasks().await?;
        self.registry.ensure_covers(template)?;
        info!(
            source = %loader.source(),
            task_types = ?self.registry.registered_types(),
            "workflow loaded, every task type has an executor"
        );

        let store = match self.store {
            Some(store) => store,
            None => self.config.store.open().await?,
        };
        let manager = WorkOrderManager::new(store, self.clock)
            .with_max_write_attempts(self.config.max_write_attempts);
        let context = ExecutorContext::new(
            manager.clone(),
            Arc::new(self.config.executor.clone()),
            self.credentials,
        );
        let reconciler = Reconciler::new(manager.clone(), Arc::new(self.registry), context.clone())
            .with_call_timeout(self.config.executor_call_timeout);

        Ok(Orchestrator::new(
            manager,
            Arc::new(loader),
            Arc::new(reconciler),
            context,
            self.ids,
            self.config.reconcile_interval,
        ))
    }
}
