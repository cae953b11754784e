//! WorkOrderStore port - the only shared mutable resource.
//!
//! Two interchangeable backends live in `impls`: a process-local map and a
//! Redis-backed store that survives restarts and can be shared by several
//! orchestrator instances.

use async_trait::async_trait;

use crate::domain::{WorkOrder, WorkOrderId};
use crate::error::StoreError;

/// Keyed persistence of work orders.
///
/// Design:
/// - `put` is an idempotent full replace.
/// - `compare_and_put` is the conditional write the manager's
///   read-modify-write loop relies on; it must be atomic per id, including
///   across processes for shared backends.
/// - Callers never block each other across different ids.
#[async_trait]
pub trait WorkOrderStore: Send + Sync {
    /// Insert a new order. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, order: &WorkOrder) -> Result<(), StoreError>;

    async fn get(&self, id: &WorkOrderId) -> Result<Option<WorkOrder>, StoreError>;

    async fn list_open(&self) -> Result<Vec<WorkOrder>, StoreError>;

    /// Unconditional full replace.
    async fn put(&self, order: &WorkOrder) -> Result<(), StoreError>;

    /// Replace the stored order only if its revision still equals
    /// `expected_revision`. Returns `false` on a conflict or when the order
    /// no longer exists.
    async fn compare_and_put(
        &self,
        order: &WorkOrder,
        expected_revision: u64,
    ) -> Result<bool, StoreError>;

    /// Returns whether an order was removed.
    async fn delete(&self, id: &WorkOrderId) -> Result<bool, StoreError>;
}
