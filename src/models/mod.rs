pub mod credential;
pub mod print_batch;
pub mod request;
pub mod snapshot;
pub mod template;

pub use credential::{Credential, CredentialStatus, ErrorSummary, NewCredential};
pub use print_batch::{
    FiltersSnapshot, NewPrintBatch, PrintBatch, PrintBatchStatus, MAX_BATCH_RETRIES,
};
pub use request::ApprovedRequest;
pub use snapshot::{
    EmployeeSnapshot, EventSnapshot, TemplateSnapshot, ZoneEntry, ZonesSnapshot,
};
pub use template::{LayoutMeta, RectPx, Template, TextAlign, TextBlock};
