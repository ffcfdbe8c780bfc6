use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::snapshot::default_schema_version;

/// Queue-level retry ceiling for batch assembly.
pub const MAX_BATCH_RETRIES: i32 = 3;

/// Lifecycle of a print batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PrintBatchStatus {
    Queued,
    Processing,
    Ready,
    Failed,
    Archived,
}

/// Audit copy of the selection criteria the batch was created with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FiltersSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub event_id: i64,
    pub area_ids: Vec<i64>,
    pub provider_ids: Vec<i64>,
    pub captured_at: DateTime<Utc>,
}

/// A print run: one PDF assembled from a fixed set of ready credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintBatch {
    pub id: i64,
    pub uuid: Uuid,
    pub event_id: i64,
    pub area_ids: Vec<i64>,
    pub provider_ids: Vec<i64>,
    /// User who requested the batch; always an explicit id, never an
    /// ambient session identity.
    pub generated_by: i64,
    pub status: PrintBatchStatus,

    pub filters_snapshot: FiltersSnapshot,
    /// Fixed at creation; the denominator for progress reporting.
    pub total_credentials: i32,
    /// Monotonic, updated after each assembled chunk.
    pub processed_credentials: i32,

    pub pdf_path: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PrintBatch {
    /// Whether an operator may requeue this batch.
    pub fn can_retry(&self) -> bool {
        self.status == PrintBatchStatus::Failed && self.retry_count < MAX_BATCH_RETRIES
    }

    /// Completion ratio in `[0.0, 1.0]` for progress displays.
    pub fn progress(&self) -> f64 {
        if self.total_credentials <= 0 {
            return 0.0;
        }
        f64::from(self.processed_credentials) / f64::from(self.total_credentials)
    }
}

/// Insert payload for a new batch.
#[derive(Debug, Clone)]
pub struct NewPrintBatch {
    pub event_id: i64,
    pub area_ids: Vec<i64>,
    pub provider_ids: Vec<i64>,
    pub generated_by: i64,
    pub filters_snapshot: FiltersSnapshot,
    pub total_credentials: i32,
}
