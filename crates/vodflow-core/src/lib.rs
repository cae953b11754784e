//! vodflow-core
//!
//! Task-dependency orchestration for a VOD media pipeline: work orders of
//! dependent tasks, advanced by a periodic reconcile loop and by job
//! completion callbacks, persisted in a pluggable store.
//!
//! # Modules
//! - **domain**: work orders, tasks, persisted record, dependency graph
//! - **ports**: store, clock, id generation, credentials
//! - **impls**: in-memory and Redis stores, static credentials
//! - **workflow**: workflow definition loader
//! - **manager**: the only mutation path for work orders
//! - **executor**: task executor registry and executor context
//! - **reconciler**: one evaluation pass over the open work orders
//! - **callback**: completion notifications to task transitions
//! - **trigger**: new source assets to work orders
//! - **app**: orchestrator wiring and lifecycle, status views
//! - **config**: process configuration

pub mod app;
pub mod callback;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod impls;
pub mod manager;
pub mod ports;
pub mod reconciler;
pub mod trigger;
pub mod workflow;

pub use app::{Orchestrator, OrchestratorBuilder, OrchestratorHandle, WorkOrderCounts};
pub use callback::{CallbackIngestor, CallbackNotification, IngestOutcome, StatusMapping};
pub use config::OrchestratorConfig;
pub use domain::{Task, TaskStatus, TaskType, WorkOrder, WorkOrderId, WorkOrderStatus};
pub use executor::{ExecutorContext, ExecutorRegistry, TaskPoller, TaskStarter};
pub use manager::WorkOrderManager;
pub use reconciler::{Reconciler, TickReport};
