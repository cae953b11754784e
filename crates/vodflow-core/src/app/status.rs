//! Status views for operators.

use serde::{Deserialize, Serialize};

use crate::domain::{TaskStatus, WorkOrder};

/// Open work orders and their tasks, counted by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderCounts {
    pub open: usize,
    /// Open orders holding a failed task; these need an operator.
    pub stuck: usize,
    /// Open orders whose tasks are all complete, waiting for the next tick
    /// to close them.
    pub ready_to_close: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl WorkOrderCounts {
    pub fn from_orders(orders: &[WorkOrder]) -> Self {
        let mut counts = Self::default();
        for order in orders.iter().filter(|o| o.is_open()) {
            counts.open += 1;
            if order.is_stuck() {
                counts.stuck += 1;
            }
            if order.all_tasks_completed() {
                counts.ready_to_close += 1;
            }
            for task in &order.tasks {
                match task.status {
                    TaskStatus::Pending => counts.pending += 1,
                    TaskStatus::InProgress => counts.in_progress += 1,
                    TaskStatus::Completed => counts.completed += 1,
                    TaskStatus::Failed => counts.failed += 1,
                }
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Task, TaskType, WorkOrderId, WorkOrderStatus};
    use chrono::Utc;
    use url::Url;

    fn order(id: &str, statuses: &[TaskStatus]) -> WorkOrder {
        let template: Vec<Task> = (0..statuses.len())
            .map(|i| Task::pending(TaskType::new(format!("T{i}")), vec![]))
            .collect();
        let mut order = WorkOrder::new(
            WorkOrderId::new(id),
            Url::parse("s3://input/a.mp4").unwrap(),
            &template,
            Utc::now(),
        );
        for (task, status) in order.tasks.iter_mut().zip(statuses) {
            task.status = *status;
        }
        order
    }

    #[test]
    fn counts_open_orders_only() {
        use TaskStatus::*;
        let mut closed = order("closed", &[Completed]);
        closed.status = WorkOrderStatus::Closed;
        let orders = [
            order("running", &[Completed, InProgress, Pending]),
            order("stuck", &[Failed, Pending]),
            order("done", &[Completed, Completed]),
            closed,
        ];

        let counts = WorkOrderCounts::from_orders(&orders);
        assert_eq!(
            counts,
            WorkOrderCounts {
                open: 3,
                stuck: 1,
                ready_to_close: 1,
                pending: 2,
                in_progress: 1,
                completed: 3,
                failed: 1,
            }
        );
    }
}
