//! App - wiring and lifecycle.
//!
//! - **OrchestratorBuilder**: registration, startup checks, store selection
//! - **Orchestrator**: owns the reconcile loop timer; stoppable via its handle
//! - **WorkOrderCounts**: status view for operators

pub mod builder;
pub mod orchestrator;
pub mod status;

pub use self::builder::OrchestratorBuilder;
pub use self::orchestrator::{Orchestrator, OrchestratorHandle};
pub use self::status::WorkOrderCounts;
