//! Lane runner: dequeues one job at a time, dispatches it to its worker
//! under the payload's timeout, and applies the worker's scheduling
//! directive. Uncaught errors and timeouts count as failed attempts with a
//! fixed default backoff; exhausted jobs run their terminal hook and land
//! in the dead-letter list.

use std::time::{Duration, Instant};

use crate::app_state::AppState;
use crate::models::ErrorSummary;
use crate::services::queue::{Delivery, JobEnvelope, JobPayload, Lane, QueueError};

use super::{expire_event, generate_credential, print_batch_pdf, regenerate_credentials};
use super::{JobError, Outcome};

/// Backoff applied to uncaught errors and timeouts. Worker-directed
/// retries carry their own delay.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

pub struct JobRunner {
    state: AppState,
}

impl JobRunner {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Pull and process at most one job from the lane. Returns whether a
    /// job was processed; queue transport errors propagate.
    pub async fn poll_once(&self, lane: Lane) -> Result<bool, QueueError> {
        let Some(mut delivery) = self.state.queue.dequeue(lane).await? else {
            return Ok(false);
        };

        // Deadlines measure from the very first attempt, so stamp it once
        // and carry it through every retry envelope.
        let first_attempted_at = *delivery
            .envelope
            .first_attempted_at
            .get_or_insert(self.state.clock.now());
        let kind = delivery.envelope.payload.kind();
        let attempt = delivery.envelope.attempt;
        tracing::info!(job_id = %delivery.envelope.id, kind, attempt, "processing job");

        let started = Instant::now();
        let dispatched = tokio::time::timeout(
            delivery.envelope.payload.timeout(),
            self.dispatch(&delivery.envelope),
        )
        .await;
        metrics::histogram!("job_duration_seconds", "kind" => kind)
            .record(started.elapsed().as_secs_f64());

        match dispatched {
            Ok(Ok(Outcome::Done)) => {
                metrics::counter!("jobs_completed_total", "kind" => kind).increment(1);
                self.acknowledge(&delivery).await?;
            }
            Ok(Ok(Outcome::RetryAfter(delay))) => {
                metrics::counter!("jobs_retried_total", "kind" => kind).increment(1);
                tracing::info!(
                    job_id = %delivery.envelope.id,
                    kind,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "job scheduled for retry"
                );
                let retry = delivery.envelope.clone().retry(self.state.clock.now());
                self.state.queue.enqueue_in(&retry, delay).await?;
                self.acknowledge(&delivery).await?;
            }
            Ok(Ok(Outcome::Fail(reason))) => {
                metrics::counter!("jobs_dead_lettered_total", "kind" => kind).increment(1);
                tracing::error!(job_id = %delivery.envelope.id, kind, %reason, "job failed terminally");
                self.state.queue.dead_letter(&delivery.envelope, &reason).await?;
                self.acknowledge(&delivery).await?;
            }
            Ok(Err(e)) => {
                self.handle_attempt_failure(&delivery, first_attempted_at, &e.to_string())
                    .await?;
            }
            Err(_elapsed) => {
                let reason = format!(
                    "timed out after {}s",
                    delivery.envelope.payload.timeout().as_secs()
                );
                self.handle_attempt_failure(&delivery, first_attempted_at, &reason)
                    .await?;
            }
        }

        Ok(true)
    }

    async fn dispatch(&self, envelope: &JobEnvelope) -> Result<Outcome, JobError> {
        let first_attempted_at = envelope
            .first_attempted_at
            .unwrap_or_else(|| self.state.clock.now());
        match &envelope.payload {
            JobPayload::GenerateCredential { credential_id } => {
                generate_credential::run(
                    &self.state,
                    *credential_id,
                    envelope.attempt,
                    first_attempted_at,
                )
                .await
            }
            JobPayload::RegenerateEventCredentials { event_id, template_id } => {
                regenerate_credentials::run_event(&self.state, *event_id, *template_id).await
            }
            JobPayload::RegenerateCredential {
                credential_id,
                template_id,
                regenerate_qr,
                regenerate_pdf,
            } => {
                regenerate_credentials::run_single(
                    &self.state,
                    *credential_id,
                    *template_id,
                    *regenerate_qr,
                    *regenerate_pdf,
                    envelope.attempt,
                )
                .await
            }
            JobPayload::AssemblePrintBatch { print_batch_id, credential_ids } => {
                print_batch_pdf::run(&self.state, *print_batch_id, credential_ids).await
            }
            JobPayload::ExpireEventCredentials { event_id } => {
                expire_event::run(&self.state, *event_id).await
            }
        }
    }

    /// An uncaught error or timeout: retry under the queue's fixed backoff
    /// while attempts remain, otherwise run the terminal hook and park the
    /// job in the dead-letter list.
    async fn handle_attempt_failure(
        &self,
        delivery: &Delivery,
        first_attempted_at: chrono::DateTime<chrono::Utc>,
        reason: &str,
    ) -> Result<(), QueueError> {
        let envelope = &delivery.envelope;
        let kind = envelope.payload.kind();
        tracing::error!(
            job_id = %envelope.id,
            kind,
            attempt = envelope.attempt,
            %reason,
            "job attempt failed"
        );

        if envelope.attempt < envelope.payload.max_attempts() {
            metrics::counter!("jobs_retried_total", "kind" => kind).increment(1);
            let mut retry = envelope.clone().retry(self.state.clock.now());
            retry.first_attempted_at = Some(first_attempted_at);
            self.state.queue.enqueue_in(&retry, DEFAULT_RETRY_DELAY).await?;
        } else {
            metrics::counter!("jobs_dead_lettered_total", "kind" => kind).increment(1);
            self.record_exhaustion(envelope, reason).await;
            self.state.queue.dead_letter(envelope, reason).await?;
        }
        self.acknowledge(delivery).await
    }

    /// Terminal hook: reflect queue exhaustion on the owning record where
    /// one exists, best-effort (the dead letter is the source of truth).
    async fn record_exhaustion(&self, envelope: &JobEnvelope, reason: &str) {
        let summary = |source: &str| ErrorSummary {
            message: format!("queue attempts exhausted: {reason}"),
            source: source.to_string(),
            kind: "queue".to_string(),
            attempt: envelope.attempt,
            occurred_at: self.state.clock.now(),
        };

        let result = match &envelope.payload {
            JobPayload::GenerateCredential { credential_id } => self
                .state
                .credentials
                .mark_failed(*credential_id, &summary("generate_credential"))
                .await
                .map(|_| ()),
            JobPayload::RegenerateCredential { credential_id, .. } => self
                .state
                .credentials
                .mark_failed(*credential_id, &summary("regenerate_credential"))
                .await
                .map(|_| ()),
            // The worker already marks the batch failed on its own errors;
            // only a kill mid-flight (timeout) leaves it `processing`.
            JobPayload::AssemblePrintBatch { print_batch_id, .. } => {
                match self.state.print_batches.get(*print_batch_id).await {
                    Ok(Some(batch)) if batch.status == crate::models::PrintBatchStatus::Processing => {
                        self.state
                            .print_batches
                            .mark_failed(
                                *print_batch_id,
                                &format!("queue attempts exhausted: {reason}"),
                                self.state.clock.now(),
                            )
                            .await
                            .map(|_| ())
                    }
                    Ok(_) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            // Event-wide jobs own no single record to mark.
            JobPayload::RegenerateEventCredentials { .. }
            | JobPayload::ExpireEventCredentials { .. } => Ok(()),
        };

        if let Err(e) = result {
            tracing::error!(job_id = %envelope.id, error = %e, "failed to record queue exhaustion");
        }
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.state.queue.complete(delivery).await
    }
}
