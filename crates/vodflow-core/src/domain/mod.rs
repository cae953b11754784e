//! Domain model (ids, tasks, work orders, persisted record, dependency graph).

pub mod graph;
pub mod record;
pub mod task;
pub mod work_order;

pub use graph::{DependencyGraph, validate_template};
pub use record::WorkOrderRecord;
pub use task::{Task, TaskStatus, TaskType};
pub use work_order::{WorkOrder, WorkOrderId, WorkOrderStatus};
