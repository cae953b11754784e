//! In-memory work order store.
//!
//! Single-process only: nothing survives a restart and closed orders stay
//! until they are deleted explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{WorkOrder, WorkOrderId};
use crate::error::StoreError;
use crate::ports::WorkOrderStore;

/// Orders keyed by id behind one `RwLock`.
///
/// The lock is held only for map operations, never across an await on
/// anything else, so writers for different ids only ever wait for a lookup.
#[derive(Clone, Default)]
pub struct InMemoryWorkOrderStore {
    orders: Arc<RwLock<HashMap<WorkOrderId, WorkOrder>>>,
}

impl InMemoryWorkOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders, open or closed.
    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

#[async_trait]
impl WorkOrderStore for InMemoryWorkOrderStore {
    async fn create(&self, order: &WorkOrder) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(StoreError::AlreadyExists(order.id.clone()));
        }
        orders.insert(order.id.clone(), order.clone());
        debug!(work_order_id = %order.id, "work order created");
        Ok(())
    }

    async fn get(&self, id: &WorkOrderId) -> Result<Option<WorkOrder>, StoreError> {
        Ok(self.orders.read().await.get(id).cloned())
    }

    async fn list_open(&self) -> Result<Vec<WorkOrder>, StoreError> {
        let orders = self.orders.read().await;
        let mut open: Vec<WorkOrder> = orders.values().filter(|o| o.is_open()).cloned().collect();
        // HashMap order is arbitrary; ticks should visit orders oldest first.
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(open)
    }

    async fn put(&self, order: &WorkOrder) -> Result<(), StoreError> {
        self.orders
            .write()
            .await
            .insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn compare_and_put(
        &self,
        order: &WorkOrder,
        expected_revision: u64,
    ) -> Result<bool, StoreError> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&order.id) {
            Some(current) if current.revision == expected_revision => {
                *current = order.clone();
                Ok(true)
            }
            Some(current) => {
                debug!(
                    work_order_id = %order.id,
                    expected_revision,
                    actual_revision = current.revision,
                    "revision conflict"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &WorkOrderId) -> Result<bool, StoreError> {
        Ok(self.orders.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Task, TaskType, WorkOrderStatus};
    use chrono::{Duration, TimeZone, Utc};
    use url::Url;

    fn order(id: &str, minute: u32) -> WorkOrder {
        WorkOrder::new(
            WorkOrderId::new(id),
            Url::parse(&format!("s3://input/{id}.mp4")).unwrap(),
            &[Task::pending(TaskType::new("ABR_TRANSCODE"), vec![])],
            Utc.with_ymd_and_hms(2024, 2, 1, 9, minute, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let store = InMemoryWorkOrderStore::new();
        store.create(&order("a", 0)).await.unwrap();

        let err = store.create(&order("a", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id.as_str() == "a"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn list_open_skips_closed_and_sorts_by_age() {
        let store = InMemoryWorkOrderStore::new();
        store.create(&order("late", 30)).await.unwrap();
        store.create(&order("early", 5)).await.unwrap();
        let mut closed = order("closed", 0);
        closed.status = WorkOrderStatus::Closed;
        store.create(&closed).await.unwrap();

        let open = store.list_open().await.unwrap();
        let ids: Vec<&str> = open.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn compare_and_put_checks_revision() {
        let store = InMemoryWorkOrderStore::new();
        let original = order("a", 0);
        store.create(&original).await.unwrap();

        let mut next = original.clone();
        next.revision = 1;
        next.updated_at += Duration::seconds(1);
        assert!(store.compare_and_put(&next, 0).await.unwrap());

        // A writer still holding revision 0 loses.
        let mut stale = original.clone();
        stale.revision = 1;
        assert!(!store.compare_and_put(&stale, 0).await.unwrap());

        assert_eq!(store.get(&original.id).await.unwrap(), Some(next));
    }

    #[tokio::test]
    async fn compare_and_put_on_missing_order_fails() {
        let store = InMemoryWorkOrderStore::new();
        assert!(!store.compare_and_put(&order("ghost", 0), 0).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn put_replaces_and_delete_reports_presence() {
        let store = InMemoryWorkOrderStore::new();
        let mut o = order("a", 0);
        store.put(&o).await.unwrap();
        o.status = WorkOrderStatus::Closed;
        store.put(&o).await.unwrap();
        assert_eq!(
            store.get(&o.id).await.unwrap().map(|o| o.status),
            Some(WorkOrderStatus::Closed)
        );

        assert!(store.delete(&o.id).await.unwrap());
        assert!(!store.delete(&o.id).await.unwrap());
        assert_eq!(store.get(&o.id).await.unwrap(), None);
    }
}
