//! Credential generation worker.
//!
//! One credential per invocation, at-least-once delivery. The idempotency
//! guard makes duplicate enqueues harmless; step failures are persisted as
//! structured summaries and retried with linear backoff until the attempt
//! ceiling or the wall-clock deadline, whichever comes first.

use chrono::{DateTime, Utc};

use crate::app_state::AppState;
use crate::models::{CredentialStatus, ErrorSummary};
use crate::services::credentials::ServiceError;

use super::{JobError, Outcome};

pub async fn run(
    state: &AppState,
    credential_id: i64,
    attempt: u32,
    first_attempted_at: DateTime<Utc>,
) -> Result<Outcome, JobError> {
    let Some(credential) = state.credentials.get(credential_id).await? else {
        tracing::warn!(credential_id, "credential vanished before generation, dropping job");
        return Ok(Outcome::Done);
    };

    if credential.status == CredentialStatus::Ready {
        tracing::debug!(credential_id, "credential already ready, skipping");
        return Ok(Outcome::Done);
    }

    let now = state.clock.now();
    let elapsed = now - first_attempted_at;
    let deadline = chrono::Duration::from_std(state.pipeline.deadline)
        .unwrap_or_else(|_| chrono::Duration::max_value());
    if elapsed >= deadline {
        let summary = ErrorSummary {
            message: format!(
                "generation deadline exceeded after {}s",
                elapsed.num_seconds()
            ),
            source: "deadline".to_string(),
            kind: "timeout".to_string(),
            attempt,
            occurred_at: now,
        };
        state.credentials.mark_failed(credential_id, &summary).await?;
        tracing::error!(credential_id, attempt, "generation deadline exceeded");
        return Ok(Outcome::Fail(summary.message));
    }

    match state.credential_service().process_generation(&credential).await {
        Ok(ready) => {
            tracing::info!(
                credential_id,
                attempt,
                generated_at = %ready.generated_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                "credential ready"
            );
            Ok(Outcome::Done)
        }
        // Store errors are infrastructure, not a generation step; let the
        // queue's default policy handle them without burning the record.
        Err(ServiceError::Store(e)) => Err(e.into()),
        Err(step_error) => {
            let now = state.clock.now();
            let summary = step_error.summary(attempt, now);
            tracing::warn!(
                credential_id,
                attempt,
                step = %summary.source,
                error = %summary.message,
                "generation step failed"
            );

            if attempt < state.pipeline.max_attempts {
                state.credentials.record_failure(credential_id, &summary).await?;
                Ok(Outcome::RetryAfter(state.pipeline.base_delay * attempt))
            } else {
                state.credentials.mark_failed(credential_id, &summary).await?;
                tracing::error!(
                    credential_id,
                    attempt,
                    "generation failed permanently, attempts exhausted"
                );
                Ok(Outcome::Fail(summary.message))
            }
        }
    }
}
