//! Bulk regeneration coordinator.
//!
//! Two entry points: reissue every credential of an event under a new
//! template, or regenerate a single credential. The event path clears QR
//! payloads (a full reissue invalidates distributed codes); the single path
//! preserves them unless explicitly asked, so a cosmetic fix never breaks
//! an already-scanned badge.

use crate::app_state::AppState;
use crate::models::TemplateSnapshot;
use crate::services::credentials::ServiceError;

use super::{JobError, Outcome};

/// One credential's failure inside an event-wide run.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemError {
    pub credential_id: i64,
    pub message: String,
}

/// Aggregate result of an event-wide regeneration. Per-item failures are
/// collected here instead of aborting the loop.
#[derive(Debug, Default, PartialEq)]
pub struct RegenerationReport {
    pub regenerated: u32,
    pub errors: Vec<ItemError>,
}

/// Event-wide reissue. Setup failures (template load, credential listing)
/// propagate so the queue retries the whole job; per-item failures only
/// land in the report.
pub async fn regenerate_event(
    state: &AppState,
    event_id: i64,
    template_id: i64,
) -> Result<RegenerationReport, JobError> {
    let Some(template) = state.templates.get(template_id).await? else {
        tracing::warn!(event_id, template_id, "template not found, nothing to regenerate");
        return Ok(RegenerationReport::default());
    };
    let snapshot = TemplateSnapshot::capture(&template, state.clock.now());
    let credentials = state.credentials.list_approved_for_event(event_id).await?;

    let service = state.credential_service();
    let mut report = RegenerationReport::default();
    for credential in credentials {
        let result: Result<(), ServiceError> = async {
            let reset = state
                .credentials
                .reset_for_reissue(credential.id, &snapshot)
                .await?;
            service.process_generation(&reset).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => report.regenerated += 1,
            Err(e) => {
                tracing::warn!(
                    credential_id = credential.id,
                    event_id,
                    error = %e,
                    "credential regeneration failed, continuing with the rest"
                );
                report.errors.push(ItemError {
                    credential_id: credential.id,
                    message: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        event_id,
        template_id,
        regenerated = report.regenerated,
        errors = report.errors.len(),
        "event regeneration finished"
    );
    Ok(report)
}

pub async fn run_event(
    state: &AppState,
    event_id: i64,
    template_id: i64,
) -> Result<Outcome, JobError> {
    regenerate_event(state, event_id, template_id).await?;
    Ok(Outcome::Done)
}

/// Single-credential regeneration. A missing credential or template is a
/// soft no-op; a step failure marks the credential failed and propagates
/// so the queue retries.
pub async fn run_single(
    state: &AppState,
    credential_id: i64,
    template_id: i64,
    regenerate_qr: bool,
    regenerate_pdf: bool,
    attempt: u32,
) -> Result<Outcome, JobError> {
    if state.credentials.get(credential_id).await?.is_none() {
        tracing::warn!(credential_id, "credential not found, skipping regeneration");
        return Ok(Outcome::Done);
    }
    let Some(template) = state.templates.get(template_id).await? else {
        tracing::warn!(template_id, credential_id, "template not found, skipping regeneration");
        return Ok(Outcome::Done);
    };

    let snapshot = TemplateSnapshot::capture(&template, state.clock.now());
    let credential = state
        .credentials
        .begin_regeneration(credential_id, &snapshot, regenerate_qr)
        .await?;

    let service = state.credential_service();
    let result: Result<(), ServiceError> = async {
        let credential = service.ensure_qr(&credential, regenerate_qr).await?;
        let credential = service.render_image(&credential).await?;
        if regenerate_pdf {
            service.render_pdf(&credential).await?;
        }
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            state
                .credentials
                .mark_ready(credential_id, state.clock.now())
                .await?;
            tracing::info!(credential_id, regenerate_qr, regenerate_pdf, "credential regenerated");
            Ok(Outcome::Done)
        }
        Err(e) => {
            let summary = e.summary(attempt, state.clock.now());
            state.credentials.mark_failed(credential_id, &summary).await?;
            Err(e.into())
        }
    }
}
