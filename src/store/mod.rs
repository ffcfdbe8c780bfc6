use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Credential, ErrorSummary, NewCredential, NewPrintBatch, PrintBatch, Template,
    TemplateSnapshot,
};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryCredentialStore, MemoryPrintBatchStore, MemoryTemplateStore};
pub use postgres::{PgCredentialStore, PgPrintBatchStore, PgTemplateStore};

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid JSON in column {column}: {source}")]
    Json {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown status value: {0}")]
    UnknownStatus(String),

    #[error("credential {0} not found")]
    CredentialNotFound(i64),

    #[error("print batch {0} not found")]
    PrintBatchNotFound(i64),
}

/// Persistence for credential records.
///
/// Mutations return the updated record so callers keep working with current
/// values instead of re-reading. `get`-style reads return `None` for missing
/// rows; mutations on missing rows are an error.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Credential>, StoreError>;

    async fn get_by_request(&self, request_id: i64) -> Result<Option<Credential>, StoreError>;

    /// Insert a pending credential with freshly minted uuid.
    async fn create(&self, new: NewCredential) -> Result<Credential, StoreError>;

    async fn mark_generating(&self, id: i64) -> Result<Credential, StoreError>;

    async fn store_qr(
        &self,
        id: i64,
        qr_code: &str,
        qr_image_path: &str,
    ) -> Result<Credential, StoreError>;

    async fn store_image_path(&self, id: i64, path: &str) -> Result<Credential, StoreError>;

    async fn store_pdf_path(&self, id: i64, path: &str) -> Result<Credential, StoreError>;

    /// Status `ready`, stamps `generated_at`, clears any error summary.
    async fn mark_ready(&self, id: i64, generated_at: DateTime<Utc>)
        -> Result<Credential, StoreError>;

    /// Persist a non-terminal attempt failure: the error summary and the
    /// attempt number land on the record, status is left alone so a retry
    /// can pick up where the guard allows.
    async fn record_failure(&self, id: i64, summary: &ErrorSummary) -> Result<(), StoreError>;

    /// Terminal failure: status `failed` plus the final error summary.
    async fn mark_failed(&self, id: i64, summary: &ErrorSummary) -> Result<(), StoreError>;

    /// Bulk-reissue reset: back to `pending`, fresh template snapshot, all
    /// artifacts dropped including the QR payload.
    async fn reset_for_reissue(
        &self,
        id: i64,
        template: &TemplateSnapshot,
    ) -> Result<Credential, StoreError>;

    /// Single-credential regeneration: status `generating`, fresh template
    /// snapshot, image and PDF dropped. QR payload and image are dropped
    /// only when `regenerate_qr` is set; otherwise an already distributed
    /// code stays scannable.
    async fn begin_regeneration(
        &self,
        id: i64,
        template: &TemplateSnapshot,
        regenerate_qr: bool,
    ) -> Result<Credential, StoreError>;

    /// All credentials of an event, any status. A row exists only for an
    /// approved request, so existence implies approval.
    async fn list_approved_for_event(&self, event_id: i64)
        -> Result<Vec<Credential>, StoreError>;

    /// The subset of `ids` that is printable at `now`: status `ready`,
    /// active, not expired. Order is unspecified; callers impose their own.
    async fn list_ready_by_ids(
        &self,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<Credential>, StoreError>;

    /// Stamp `printed_at` and the owning batch on every listed credential.
    /// Idempotent: restamping with the same batch is harmless.
    async fn mark_printed(
        &self,
        ids: &[i64],
        print_batch_id: i64,
        printed_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Deactivate all active credentials of an event and cap `expires_at`
    /// at `now`. Returns how many rows changed; already-expired rows are
    /// untouched, so the sweep is naturally idempotent.
    async fn expire_event_credentials(
        &self,
        event_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

/// Persistence for print batch records.
#[async_trait]
pub trait PrintBatchStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<PrintBatch>, StoreError>;

    /// Insert a queued batch with freshly minted uuid.
    async fn create(&self, new: NewPrintBatch) -> Result<PrintBatch, StoreError>;

    /// Status `processing`, stamps `started_at`, clears the previous error
    /// and resets progress (a rerun rebuilds the whole document).
    async fn mark_processing(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<PrintBatch, StoreError>;

    async fn update_progress(&self, id: i64, processed: i32) -> Result<(), StoreError>;

    /// Status `ready` with the stored PDF path; progress snaps to the total.
    async fn mark_ready(
        &self,
        id: i64,
        pdf_path: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<PrintBatch, StoreError>;

    /// Status `failed`: records the message, bumps `retry_count`, stamps
    /// `finished_at`.
    async fn mark_failed(
        &self,
        id: i64,
        error: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<PrintBatch, StoreError>;

    async fn archive(&self, id: i64) -> Result<PrintBatch, StoreError>;
}

/// Read access to credential templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Template>, StoreError>;
}
