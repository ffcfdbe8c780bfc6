//! Print batch assembly tests: chunked progress reporting, page ordering,
//! missing-image skips, the empty-batch failure path, and idempotency.

mod support;

use chrono::Utc;
use lopdf::{Document, Object};

use credential_pipeline::jobs::{print_batch_pdf, JobRunner, Outcome};
use credential_pipeline::models::{
    FiltersSnapshot, NewPrintBatch, PrintBatch, PrintBatchStatus,
};
use credential_pipeline::services::queue::{JobPayload, Lane};
use credential_pipeline::services::storage::Storage;
use credential_pipeline::store::{CredentialStore, PrintBatchStore};

use support::Harness;

async fn create_batch(h: &Harness, event_id: i64, total: i32) -> PrintBatch {
    h.print_batches
        .create(NewPrintBatch {
            event_id,
            area_ids: vec![1],
            provider_ids: vec![],
            generated_by: 42,
            filters_snapshot: FiltersSnapshot {
                schema_version: 1,
                event_id,
                area_ids: vec![1],
                provider_ids: vec![],
                captured_at: Utc::now(),
            },
            total_credentials: total,
        })
        .await
        .unwrap()
}

/// Pixel widths of the embedded image on each page, in page order.
fn page_image_widths(pdf: &[u8]) -> Vec<i64> {
    let doc = Document::load_mem(pdf).unwrap();
    let mut widths = Vec::new();
    for (_, page_id) in doc.get_pages() {
        let page = doc.get_dictionary(page_id).unwrap();
        let resources = match page.get(b"Resources").unwrap() {
            Object::Reference(id) => doc.get_dictionary(*id).unwrap(),
            Object::Dictionary(dict) => dict,
            other => panic!("unexpected resources object: {other:?}"),
        };
        let xobjects = resources.get(b"XObject").and_then(Object::as_dict).unwrap();
        let image_id = xobjects.get(b"Im0").unwrap().as_reference().unwrap();
        let stream = doc.get_object(image_id).unwrap().as_stream().unwrap();
        widths.push(stream.dict.get(b"Width").unwrap().as_i64().unwrap());
    }
    widths
}

#[tokio::test]
async fn chunk_progress_steps_through_100_200_250() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for id in 1..=250 {
        h.seed_ready_with_image(id, 3, 80, 56).await;
        ids.push(id);
    }
    let batch = create_batch(&h, 3, 250).await;

    let outcome = print_batch_pdf::run(&h.state, batch.id, &ids).await.unwrap();
    assert_eq!(outcome, Outcome::Done);

    assert_eq!(h.print_batches.progress_history(batch.id), vec![100, 200, 250]);
    let done = h.print_batches.get(batch.id).await.unwrap().unwrap();
    assert_eq!(done.status, PrintBatchStatus::Ready);
    assert_eq!(done.processed_credentials, 250);
    assert_eq!(done.processed_credentials, done.total_credentials);
    assert!(done.started_at.is_some());
    assert!(done.finished_at.is_some());

    let pdf_path = done.pdf_path.unwrap();
    assert_eq!(pdf_path, format!("print_batches/batch_{}.pdf", done.uuid));
    let bytes = h.storage.read(&pdf_path).await.unwrap();
    assert!(bytes.len() >= 1024);
    assert_eq!(Document::load_mem(&bytes).unwrap().get_pages().len(), 250);
}

#[tokio::test]
async fn pages_follow_the_batch_id_order() {
    let h = Harness::new();
    // Distinct widths let the output prove its ordering.
    h.seed_ready_with_image(1, 3, 100, 70).await;
    h.seed_ready_with_image(2, 3, 120, 84).await;
    h.seed_ready_with_image(3, 3, 140, 98).await;
    let batch = create_batch(&h, 3, 3).await;

    let ids = vec![3, 1, 2];
    print_batch_pdf::run(&h.state, batch.id, &ids).await.unwrap();

    let done = h.print_batches.get(batch.id).await.unwrap().unwrap();
    let bytes = h.storage.read(&done.pdf_path.unwrap()).await.unwrap();
    assert_eq!(page_image_widths(&bytes), vec![140, 100, 120]);
}

#[tokio::test]
async fn missing_image_skips_the_credential_not_the_batch() {
    let h = Harness::new();
    h.seed_ready_with_image(1, 3, 80, 56).await;
    let broken = h.seed_ready_credential(2, 3); // path set, file never written
    h.seed_ready_with_image(3, 3, 80, 56).await;
    let batch = create_batch(&h, 3, 3).await;

    let outcome = print_batch_pdf::run(&h.state, batch.id, &[1, 2, 3])
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Done);

    let done = h.print_batches.get(batch.id).await.unwrap().unwrap();
    assert_eq!(done.status, PrintBatchStatus::Ready);
    let bytes = h.storage.read(&done.pdf_path.unwrap()).await.unwrap();
    assert_eq!(Document::load_mem(&bytes).unwrap().get_pages().len(), 2);

    // Only composited credentials are stamped printed.
    for id in [1, 3] {
        let c = h.credentials.get(id).await.unwrap().unwrap();
        assert_eq!(c.printed_at, Some(h.now()));
        assert_eq!(c.print_batch_id, Some(batch.id));
    }
    let skipped = h.credentials.get(broken.id).await.unwrap().unwrap();
    assert!(skipped.printed_at.is_none());
    assert!(skipped.print_batch_id.is_none());
}

#[tokio::test]
async fn empty_batch_fails_with_a_descriptive_error() {
    let h = Harness::new();
    // Credential exists but is not ready, so nothing resolves.
    let pending = {
        let mut c = h.seed_ready_credential(1, 3);
        c.status = credential_pipeline::models::CredentialStatus::Pending;
        h.credentials.insert(c.clone());
        c
    };
    let batch = create_batch(&h, 3, 1).await;

    let result = print_batch_pdf::run(&h.state, batch.id, &[pending.id]).await;
    assert!(result.is_err());

    let failed = h.print_batches.get(batch.id).await.unwrap().unwrap();
    assert_eq!(failed.status, PrintBatchStatus::Failed);
    assert!(failed
        .error_message
        .as_deref()
        .unwrap()
        .contains("matched no ready credentials"));
    assert!(failed.pdf_path.is_none());
    assert_eq!(failed.retry_count, 1);
    assert!(failed.finished_at.is_some());
}

#[tokio::test]
async fn ready_and_archived_batches_are_not_reassembled() {
    let h = Harness::new();
    h.seed_ready_with_image(1, 3, 80, 56).await;
    let batch = create_batch(&h, 3, 1).await;

    print_batch_pdf::run(&h.state, batch.id, &[1]).await.unwrap();
    let first = h.print_batches.get(batch.id).await.unwrap().unwrap();

    // Second run is a pure no-op: no new progress updates, same record.
    let outcome = print_batch_pdf::run(&h.state, batch.id, &[1]).await.unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(h.print_batches.progress_history(batch.id), vec![1]);
    let second = h.print_batches.get(batch.id).await.unwrap().unwrap();
    assert_eq!(second.finished_at, first.finished_at);

    let archived = create_batch(&h, 3, 1).await;
    h.print_batches.archive(archived.id).await.unwrap();
    let outcome = print_batch_pdf::run(&h.state, archived.id, &[1]).await.unwrap();
    assert_eq!(outcome, Outcome::Done);
    let untouched = h.print_batches.get(archived.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, PrintBatchStatus::Archived);
}

#[tokio::test]
async fn failed_batches_retry_through_the_queue_then_dead_letter() {
    let h = Harness::new();
    let batch = create_batch(&h, 3, 1).await;
    let runner = JobRunner::new(h.state.clone());

    // No ready credentials: every attempt fails, with the queue's fixed
    // 30s backoff between attempts.
    h.enqueue(JobPayload::AssemblePrintBatch {
        print_batch_id: batch.id,
        credential_ids: vec![77],
    })
    .await;

    for attempt in 1u32..=2 {
        assert!(runner.poll_once(Lane::Credentials).await.unwrap());
        let scheduled = h.queue.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].1.attempt, attempt + 1);
        h.clock.set(scheduled[0].0);
    }
    assert!(runner.poll_once(Lane::Credentials).await.unwrap());

    assert!(h.queue.scheduled().is_empty());
    assert_eq!(h.queue.dead_letters().len(), 1);
    let failed = h.print_batches.get(batch.id).await.unwrap().unwrap();
    assert_eq!(failed.status, PrintBatchStatus::Failed);
    assert_eq!(failed.retry_count, 3);
}
