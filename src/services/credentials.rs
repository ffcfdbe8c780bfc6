//! Credential domain service.
//!
//! Orchestrates record transitions and artifact rendering for one
//! credential at a time: creation at approval, QR/image/PDF generation,
//! and the event-wide expiration sweep. Step failures carry the step label
//! so error summaries can say which stage broke.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::clock::Clock;
use crate::models::{
    ApprovedRequest, Credential, ErrorSummary, NewCredential, TemplateSnapshot,
};
use crate::services::renderer::{CredentialRenderer, RenderError};
use crate::store::{CredentialStore, StoreError};

/// Pipeline step labels recorded in error summaries.
pub const STEP_QR: &str = "generate_qr";
pub const STEP_IMAGE: &str = "generate_image";
pub const STEP_PDF: &str = "generate_pdf";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: RenderError,
    },
}

impl ServiceError {
    /// Structured summary for persisting on the credential record. Store
    /// errors have no step; they surface as infrastructure failures.
    pub fn summary(&self, attempt: u32, now: DateTime<Utc>) -> ErrorSummary {
        let (source, kind) = match self {
            ServiceError::Step { step, source } => (*step, source.kind()),
            ServiceError::Store(_) => ("store", "store"),
        };
        ErrorSummary {
            message: self.to_string(),
            source: source.to_string(),
            kind: kind.to_string(),
            attempt,
            occurred_at: now,
        }
    }
}

fn step(label: &'static str) -> impl FnOnce(RenderError) -> ServiceError {
    move |source| ServiceError::Step {
        step: label,
        source,
    }
}

pub struct CredentialService {
    credentials: Arc<dyn CredentialStore>,
    renderer: Arc<dyn CredentialRenderer>,
    clock: Arc<dyn Clock>,
}

impl CredentialService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        renderer: Arc<dyn CredentialRenderer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            renderer,
            clock,
        }
    }

    /// Create the pending credential for an approved request, snapshotting
    /// everything the pipeline will ever read from the approval side.
    /// Idempotent per request: a second approval event returns the
    /// existing record untouched.
    pub async fn create_for_request(
        &self,
        request: &ApprovedRequest,
    ) -> Result<Credential, ServiceError> {
        if let Some(existing) = self.credentials.get_by_request(request.id).await? {
            tracing::debug!(
                credential_id = existing.id,
                request_id = request.id,
                "credential already exists for request"
            );
            return Ok(existing);
        }

        let now = self.clock.now();
        let credential = self
            .credentials
            .create(NewCredential {
                accreditation_request_id: request.id,
                employee_snapshot: request.employee.clone(),
                template_snapshot: TemplateSnapshot::capture(&request.template, now),
                event_snapshot: request.event.clone(),
                zones_snapshot: request.zones.clone(),
                expires_at: Some(request.event.ends_at),
            })
            .await?;
        tracing::info!(
            credential_id = credential.id,
            request_id = request.id,
            "credential created"
        );
        Ok(credential)
    }

    /// Make sure the credential has a QR payload and image. Present QRs are
    /// kept unless `force` is set: a reprinted badge must keep scanning as
    /// the same credential.
    pub async fn ensure_qr(
        &self,
        credential: &Credential,
        force: bool,
    ) -> Result<Credential, ServiceError> {
        if !force && credential.qr_code.is_some() && credential.qr_image_path.is_some() {
            return Ok(credential.clone());
        }

        let artifact = self
            .renderer
            .render_qr(credential)
            .await
            .map_err(step(STEP_QR))?;
        Ok(self
            .credentials
            .store_qr(credential.id, &artifact.payload, &artifact.image_path)
            .await?)
    }

    /// Composite and persist the credential image.
    pub async fn render_image(&self, credential: &Credential) -> Result<Credential, ServiceError> {
        let path = self
            .renderer
            .render_image(credential)
            .await
            .map_err(step(STEP_IMAGE))?;
        Ok(self.credentials.store_image_path(credential.id, &path).await?)
    }

    /// Render and persist the single-credential PDF.
    pub async fn render_pdf(&self, credential: &Credential) -> Result<Credential, ServiceError> {
        let path = self
            .renderer
            .render_pdf(credential)
            .await
            .map_err(step(STEP_PDF))?;
        Ok(self.credentials.store_pdf_path(credential.id, &path).await?)
    }

    /// The full synchronous generation pass: QR if missing, then image,
    /// then PDF, then `ready`. Used by the generation worker and by bulk
    /// regeneration, which runs it inline per credential.
    pub async fn process_generation(
        &self,
        credential: &Credential,
    ) -> Result<Credential, ServiceError> {
        let credential = self.credentials.mark_generating(credential.id).await?;
        let credential = self.ensure_qr(&credential, false).await?;
        let credential = self.render_image(&credential).await?;
        let credential = self.render_pdf(&credential).await?;
        let ready = self
            .credentials
            .mark_ready(credential.id, self.clock.now())
            .await?;
        tracing::info!(credential_id = ready.id, "credential generated");
        Ok(ready)
    }

    /// Expire every active credential of an event. Naturally idempotent:
    /// a second sweep matches nothing.
    pub async fn expire_event(&self, event_id: i64) -> Result<u64, ServiceError> {
        let count = self
            .credentials
            .expire_event_credentials(event_id, self.clock.now())
            .await?;
        tracing::info!(event_id, expired = count, "event credentials expired");
        Ok(count)
    }
}
