//! Print batch assembly worker.
//!
//! Merges a fixed, ordered set of ready credentials into one print-ready
//! PDF: one credential per page at the reference physical size, processed
//! in chunks so peak memory stays bounded. Per-image problems skip the
//! credential; anything else fails the whole batch and defers to the
//! queue's retry policy. A retried run rebuilds the document from scratch —
//! `processed_credentials` is progress reporting, not a checkpoint.

use crate::app_state::AppState;
use crate::models::{Credential, PrintBatch, PrintBatchStatus};
use crate::services::pdf::{credential_page_size, normalize_jpeg, PdfBuilder};

use super::{JobError, Outcome};

/// Credentials composited per chunk; bounds peak memory during assembly.
pub const CHUNK_SIZE: usize = 100;

/// Anything smaller than this out of the builder is a corrupt document.
pub const MIN_PDF_BYTES: usize = 1024;

pub async fn run(
    state: &AppState,
    print_batch_id: i64,
    credential_ids: &[i64],
) -> Result<Outcome, JobError> {
    let Some(batch) = state.print_batches.get(print_batch_id).await? else {
        tracing::warn!(print_batch_id, "print batch vanished, dropping job");
        return Ok(Outcome::Done);
    };

    match batch.status {
        PrintBatchStatus::Ready => {
            tracing::debug!(print_batch_id, "batch already ready, skipping");
            return Ok(Outcome::Done);
        }
        PrintBatchStatus::Archived => {
            tracing::warn!(print_batch_id, "batch archived, not assembling");
            return Ok(Outcome::Done);
        }
        _ => {}
    }

    let batch = state
        .print_batches
        .mark_processing(print_batch_id, state.clock.now())
        .await?;

    match assemble(state, &batch, credential_ids).await {
        Ok(pages) => {
            tracing::info!(print_batch_id, pages, "print batch ready");
            Ok(Outcome::Done)
        }
        Err(e) => {
            state
                .print_batches
                .mark_failed(print_batch_id, &e.to_string(), state.clock.now())
                .await?;
            tracing::error!(print_batch_id, error = %e, "print batch failed");
            Err(e)
        }
    }
}

async fn assemble(
    state: &AppState,
    batch: &PrintBatch,
    credential_ids: &[i64],
) -> Result<usize, JobError> {
    let now = state.clock.now();
    let resolved = state.credentials.list_ready_by_ids(credential_ids, now).await?;
    // Page order must follow the id order fixed at batch creation; the
    // store makes no ordering promise.
    let ordered = in_id_order(resolved, credential_ids);
    if ordered.is_empty() {
        return Err(JobError::Batch(format!(
            "print batch {} matched no ready credentials",
            batch.uuid
        )));
    }

    let mut builder = PdfBuilder::new(credential_page_size());
    let mut placed_ids: Vec<i64> = Vec::with_capacity(ordered.len());
    let mut processed: i32 = 0;

    for chunk in ordered.chunks(CHUNK_SIZE) {
        for credential in chunk {
            if place_credential(state, &mut builder, credential).await.is_some() {
                placed_ids.push(credential.id);
            }
        }
        // Buffers read for this chunk have dropped by here; only the
        // document under construction stays resident.
        processed += chunk.len() as i32;
        state.print_batches.update_progress(batch.id, processed).await?;
        metrics::counter!("print_batch_pages_total").increment(chunk.len() as u64);
    }

    let pages = builder.page_count();
    let title = format!("Print batch {}", batch.uuid);
    let bytes = builder.finish(&title)?;
    if bytes.len() < MIN_PDF_BYTES {
        return Err(JobError::Batch(format!(
            "assembled PDF is {} bytes, under the {MIN_PDF_BYTES}-byte corruption floor",
            bytes.len()
        )));
    }

    state.storage.make_directory("print_batches").await?;
    let pdf_path = format!("print_batches/batch_{}.pdf", batch.uuid);
    state.storage.write(&pdf_path, &bytes).await?;

    let printed_at = state.clock.now();
    let stamped = state
        .credentials
        .mark_printed(&placed_ids, batch.id, printed_at)
        .await?;
    tracing::debug!(print_batch_id = batch.id, stamped, "credentials stamped printed");

    state
        .print_batches
        .mark_ready(batch.id, &pdf_path, state.clock.now())
        .await?;
    Ok(pages)
}

/// Composite one credential onto its own page. Missing or unreadable
/// artwork skips the credential; the batch carries on without it.
async fn place_credential(
    state: &AppState,
    builder: &mut PdfBuilder,
    credential: &Credential,
) -> Option<()> {
    let Some(image_path) = credential.credential_image_path.as_deref() else {
        tracing::warn!(credential_id = credential.id, "ready credential has no image path, skipping");
        return None;
    };

    match state.storage.exists(image_path).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(
                credential_id = credential.id,
                path = image_path,
                "credential image missing from storage, skipping"
            );
            return None;
        }
        Err(e) => {
            tracing::warn!(
                credential_id = credential.id,
                path = image_path,
                error = %e,
                "could not stat credential image, skipping"
            );
            return None;
        }
    }

    let bytes = match state.storage.read(image_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(
                credential_id = credential.id,
                path = image_path,
                error = %e,
                "could not read credential image, skipping"
            );
            return None;
        }
    };

    let placed = normalize_jpeg(&bytes)
        .and_then(|(jpeg, width, height)| builder.add_jpeg_page(&jpeg, width, height));
    match placed {
        Ok(()) => Some(()),
        Err(e) => {
            tracing::warn!(
                credential_id = credential.id,
                error = %e,
                "image placement failed, skipping"
            );
            None
        }
    }
}

/// Reorder resolved credentials to the id order fixed at batch creation;
/// ids that resolved to nothing simply don't appear.
fn in_id_order(resolved: Vec<Credential>, ids: &[i64]) -> Vec<Credential> {
    let mut by_id: std::collections::HashMap<i64, Credential> =
        resolved.into_iter().map(|c| (c.id, c)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}
