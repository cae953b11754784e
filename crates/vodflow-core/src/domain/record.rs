//! Flat persisted layout of a work order.
//!
//! One record per work-order id. The source is kept as a URI string and the
//! timestamps as RFC 3339 (ISO-8601) strings with full sub-second precision,
//! so `decode(encode(order)) == order` holds exactly.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::task::Task;
use super::work_order::{WorkOrder, WorkOrderId, WorkOrderStatus};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrderRecord {
    pub id: String,
    pub source: String,
    pub status: WorkOrderStatus,
    pub tasks: Vec<Task>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub revision: u64,
}

impl From<&WorkOrder> for WorkOrderRecord {
    fn from(order: &WorkOrder) -> Self {
        Self {
            id: order.id.as_str().to_string(),
            source: order.source.to_string(),
            status: order.status,
            tasks: order.tasks.clone(),
            created_at: format_timestamp(&order.created_at),
            updated_at: format_timestamp(&order.updated_at),
            revision: order.revision,
        }
    }
}

impl TryFrom<WorkOrderRecord> for WorkOrder {
    type Error = StoreError;

    fn try_from(record: WorkOrderRecord) -> Result<Self, Self::Error> {
        let source = Url::parse(&record.source)
            .map_err(|e| StoreError::Codec(format!("source {:?}: {e}", record.source)))?;
        Ok(Self {
            id: WorkOrderId::new(record.id),
            source,
            status: record.status,
            tasks: record.tasks,
            created_at: parse_timestamp(&record.created_at)?,
            updated_at: parse_timestamp(&record.updated_at)?,
            revision: record.revision,
        })
    }
}

/// Serialize a work order to its persisted JSON form.
pub fn encode(order: &WorkOrder) -> Result<String, StoreError> {
    Ok(serde_json::to_string(&WorkOrderRecord::from(order))?)
}

/// Parse a persisted JSON record back into a work order.
pub fn decode(raw: &str) -> Result<WorkOrder, StoreError> {
    let record: WorkOrderRecord = serde_json::from_str(raw)?;
    WorkOrder::try_from(record)
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Codec(format!("timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskStatus, TaskType};
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> WorkOrder {
        let created = Utc.with_ymd_and_hms(2024, 3, 9, 10, 15, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let transcode_job = json!({
            "id": "encore-job-123",
            "status": "SUCCESSFUL",
            "externalId": "test-workorder",
            "inputs": [{"uri": "s3://bucket/input.mp4"}],
            "output": [{
                "type": "VideoFile",
                "format": "mp4",
                "file": "s3://bucket/output.mp4",
                "fileSize": 1024000,
                "overallBitrate": 2000000,
                "videoStreams": [{"codec": "h264", "bitrate": 1500000}],
                "audioStreams": [{"codec": "aac", "bitrate": 128000, "channels": 2}]
            }]
        });
        WorkOrder {
            id: WorkOrderId::new("test-workorder"),
            source: Url::parse("s3://bucket/source.mp4").unwrap(),
            status: WorkOrderStatus::Open,
            tasks: vec![
                Task {
                    task_type: TaskType::new("ABR_TRANSCODE"),
                    depends_on: vec![],
                    status: TaskStatus::Completed,
                    payload: Some(transcode_job),
                },
                Task {
                    task_type: TaskType::new("VOD_PACKAGE"),
                    depends_on: vec![TaskType::new("ABR_TRANSCODE")],
                    status: TaskStatus::InProgress,
                    payload: Some(json!({"name": "hoppsan"})),
                },
                Task::pending(TaskType::new("TRANSCRIBE"), vec![]),
                Task {
                    task_type: TaskType::new("CLEANUP"),
                    depends_on: vec![TaskType::new("VOD_PACKAGE")],
                    status: TaskStatus::Pending,
                    payload: Some(json!(["a", 1, null])),
                },
            ],
            created_at: created,
            updated_at: created + chrono::Duration::milliseconds(1500),
            revision: 7,
        }
    }

    #[test]
    fn encode_then_decode_is_exact() {
        let order = sample();
        let raw = encode(&order).unwrap();
        assert_eq!(decode(&raw).unwrap(), order);
    }

    #[test]
    fn record_layout_is_flat() {
        let raw = encode(&sample()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["source"], "s3://bucket/source.mp4");
        assert_eq!(v["createdAt"], "2024-03-09T10:15:00.123456789Z");
        assert_eq!(v["status"], "OPEN");
        assert_eq!(v["tasks"][1]["dependsOn"][0], "ABR_TRANSCODE");
        assert_eq!(v["tasks"][2].get("payload"), None);
        assert_eq!(v["revision"], 7);
    }

    #[test]
    fn bad_timestamp_is_a_codec_error() {
        let mut record = WorkOrderRecord::from(&sample());
        record.created_at = "yesterday".to_string();
        let err = WorkOrder::try_from(record).unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }

    #[test]
    fn bad_source_is_a_codec_error() {
        let mut record = WorkOrderRecord::from(&sample());
        record.source = "not a uri".to_string();
        assert!(matches!(
            WorkOrder::try_from(record),
            Err(StoreError::Codec(_))
        ));
    }
}
