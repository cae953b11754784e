//! New-source-asset events to work orders.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::domain::WorkOrder;
use crate::error::{ManagerError, StoreError, TriggerError};
use crate::manager::WorkOrderManager;
use crate::ports::WorkOrderIdGenerator;
use crate::workflow::WorkflowLoader;

/// A freshly generated id colliding is unlikely; a few attempts suffice.
const ID_ATTEMPTS: usize = 3;

/// An object that appeared in the input bucket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceAssetEvent {
    pub bucket: String,
    pub key: String,
}

impl SourceAssetEvent {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// From one record of an S3-style bucket notification
    /// (`s3.bucket.name`, `s3.object.key`).
    pub fn from_notification_record(record: &Value) -> Option<Self> {
        let s3 = record.get("s3")?;
        let bucket = s3.get("bucket")?.get("name")?.as_str()?;
        let key = s3.get("object")?.get("key")?.as_str()?;
        Some(Self::new(bucket, key))
    }

    /// Last path segment of the key, or the whole key if that is empty.
    pub fn file_name(&self) -> &str {
        match self.key.rsplit('/').next() {
            Some(name) if !name.is_empty() => name,
            _ => &self.key,
        }
    }

    /// `s3://<bucket>/<key>`
    pub fn source_uri(&self) -> Result<Url, TriggerError> {
        let invalid = |reason: &str| TriggerError::InvalidSource {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            reason: reason.to_string(),
        };
        if self.bucket.is_empty() {
            return Err(invalid("empty bucket name"));
        }
        if self.key.is_empty() {
            return Err(invalid("empty object key"));
        }
        Url::parse(&format!("s3://{}/{}", self.bucket, self.key))
            .map_err(|e| invalid(&e.to_string()))
    }
}

/// Create a work order for `event` from the loaded workflow template.
///
/// A loader failure is returned as is and nothing is remembered, so the next
/// event tries to load the definition again.
pub async fn create_from_event(
    manager: &WorkOrderManager,
    loader: &WorkflowLoader,
    ids: &dyn WorkOrderIdGenerator,
    event: &SourceAssetEvent,
) -> Result<WorkOrder, TriggerError> {
    let source = event.source_uri()?;
    let template = loader.get_tasks().await?;
    info!(%source, "new source asset");

    let mut attempt = 1;
    loop {
        let id = ids.generate(event.file_name());
        match manager.create_work_order(id.clone(), source.clone(), template).await {
            Ok(order) => return Ok(order),
            Err(ManagerError::Store(StoreError::AlreadyExists(_))) if attempt < ID_ATTEMPTS => {
                warn!(work_order_id = %id, "generated work order id already taken");
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
