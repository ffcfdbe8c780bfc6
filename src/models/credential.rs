use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::snapshot::{EmployeeSnapshot, EventSnapshot, TemplateSnapshot, ZonesSnapshot};

/// Lifecycle of a credential record.
///
/// Suspension and expiry are not statuses; they live on `is_active` and
/// `expires_at` so a revoked credential keeps its rendering history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CredentialStatus {
    Pending,
    Generating,
    Ready,
    Failed,
}

/// Structured record of the last generation failure, persisted with the
/// credential so support can see what broke without grepping logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorSummary {
    pub message: String,
    /// Pipeline step that failed: `generate_qr`, `generate_image`, `generate_pdf`.
    pub source: String,
    /// Error family reported by the failing layer, e.g. `storage`, `render`.
    pub kind: String,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

/// A printable credential issued for one approved accreditation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub uuid: Uuid,
    pub accreditation_request_id: i64,
    pub status: CredentialStatus,

    pub employee_snapshot: EmployeeSnapshot,
    pub template_snapshot: TemplateSnapshot,
    pub event_snapshot: EventSnapshot,
    pub zones_snapshot: ZonesSnapshot,

    pub qr_code: Option<String>,
    pub qr_image_path: Option<String>,
    pub credential_image_path: Option<String>,
    pub credential_pdf_path: Option<String>,

    pub generated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub printed_at: Option<DateTime<Utc>>,
    pub print_batch_id: Option<i64>,

    pub error_summary: Option<ErrorSummary>,
    pub retry_count: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Printable right now: rendered, active and not past expiry.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == CredentialStatus::Ready
            && self.is_active
            && self.expires_at.is_none_or(|at| at > now)
    }

    pub fn event_id(&self) -> i64 {
        self.event_snapshot.event_id
    }
}

/// Insert payload captured from an approved request.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub accreditation_request_id: i64,
    pub employee_snapshot: EmployeeSnapshot,
    pub template_snapshot: TemplateSnapshot,
    pub event_snapshot: EventSnapshot,
    pub zones_snapshot: ZonesSnapshot,
    pub expires_at: Option<DateTime<Utc>>,
}
