//! The pipeline's four workers and the lane runner that drives them.
//!
//! Workers are plain async functions over [`AppState`](crate::app_state::AppState)
//! returning a scheduling directive: the worker decides what should happen
//! next (done, retry after a delay, terminal failure) and the runner applies
//! it against the queue. Uncaught errors bubble as [`JobError`] and fall
//! under the queue's default retry policy.

use std::time::Duration;

use crate::services::credentials::ServiceError;
use crate::services::pdf::PdfError;
use crate::services::queue::QueueError;
use crate::services::storage::StorageError;
use crate::store::StoreError;

pub mod expire_event;
pub mod generate_credential;
pub mod print_batch_pdf;
pub mod regenerate_credentials;
pub mod runner;

pub use runner::JobRunner;

/// What the runner should do with the job after a worker returns.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// Finished (including soft no-ops); acknowledge and move on.
    Done,
    /// Transient failure already recorded on the owning record; run the
    /// same job again after the delay.
    RetryAfter(Duration),
    /// Terminal, reported failure; dead-letter, never re-run.
    Fail(String),
}

/// Uncaught worker failure. The runner counts these against the payload's
/// attempt ceiling with the default fixed backoff.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Pdf(#[from] PdfError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("{0}")]
    Batch(String),
}
