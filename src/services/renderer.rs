//! Artifact rendering seam.
//!
//! Workers speak to a [`CredentialRenderer`] rather than to the raster and
//! PDF code directly; tests substitute a counting fake, production uses
//! [`ArtifactRenderer`] over blob storage.

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::Credential;
use crate::services::compositor::{ComposeError, ComposeJob, Compositor};
use crate::services::pdf::{self, PdfError};
use crate::services::qr::{self, QrCodeError};
use crate::services::storage::{Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("QR rendering failed: {0}")]
    Qr(#[from] QrCodeError),

    #[error("compositing failed: {0}")]
    Compose(#[from] ComposeError),

    #[error("PDF rendering failed: {0}")]
    Pdf(#[from] PdfError),

    #[error("missing prerequisite artifact: {0}")]
    MissingArtifact(&'static str),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RenderError {
    /// Error family recorded in a credential's error summary.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::Storage(_) => "storage",
            RenderError::Qr(_) | RenderError::Compose(_) | RenderError::Pdf(_) => "render",
            RenderError::MissingArtifact(_) => "missing_artifact",
            RenderError::Join(_) => "runtime",
        }
    }
}

/// A freshly minted QR: the payload that goes in the database and the
/// storage path of its rendered PNG.
#[derive(Debug, Clone, PartialEq)]
pub struct QrArtifact {
    pub payload: String,
    pub image_path: String,
}

/// Renders and stores the three credential artifacts. Each call returns the
/// storage path it wrote; persisting that path on the record is the
/// caller's job.
#[async_trait]
pub trait CredentialRenderer: Send + Sync {
    async fn render_qr(&self, credential: &Credential) -> Result<QrArtifact, RenderError>;

    async fn render_image(&self, credential: &Credential) -> Result<String, RenderError>;

    async fn render_pdf(&self, credential: &Credential) -> Result<String, RenderError>;
}

/// Production renderer: artifacts live in blob storage under the
/// credential's uuid, compositing runs on the blocking pool.
pub struct ArtifactRenderer {
    storage: Arc<dyn Storage>,
    compositor: Arc<Compositor>,
}

impl ArtifactRenderer {
    pub fn new(storage: Arc<dyn Storage>, compositor: Arc<Compositor>) -> Self {
        Self {
            storage,
            compositor,
        }
    }
}

#[async_trait]
impl CredentialRenderer for ArtifactRenderer {
    async fn render_qr(&self, credential: &Credential) -> Result<QrArtifact, RenderError> {
        let payload = qr::new_payload();
        let png = qr::render_png(&payload)?;
        let image_path = format!("credentials/qr/{}.png", credential.uuid);
        self.storage.write(&image_path, &png).await?;
        Ok(QrArtifact {
            payload,
            image_path,
        })
    }

    async fn render_image(&self, credential: &Credential) -> Result<String, RenderError> {
        let qr_path = credential
            .qr_image_path
            .as_deref()
            .ok_or(RenderError::MissingArtifact("qr image"))?;

        let template_image = self
            .storage
            .read(&credential.template_snapshot.file_path)
            .await?;
        let qr_image = self.storage.read(qr_path).await?;
        let photo = match &credential.employee_snapshot.photo_path {
            Some(path) => Some(self.storage.read(path).await?),
            None => None,
        };

        let job = ComposeJob {
            template_image,
            photo,
            qr_image,
            layout: credential.template_snapshot.layout.clone(),
            employee: credential.employee_snapshot.clone(),
            event: credential.event_snapshot.clone(),
            zones: credential.zones_snapshot.clone(),
        };
        let compositor = self.compositor.clone();
        let jpeg = tokio::task::spawn_blocking(move || compositor.compose(&job)).await??;

        let path = format!("credentials/images/{}.jpg", credential.uuid);
        self.storage.write(&path, &jpeg).await?;
        Ok(path)
    }

    async fn render_pdf(&self, credential: &Credential) -> Result<String, RenderError> {
        let image_path = credential
            .credential_image_path
            .as_deref()
            .ok_or(RenderError::MissingArtifact("credential image"))?;

        let bytes = self.storage.read(image_path).await?;
        let title = format!("Credential {}", credential.uuid);
        let pdf = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, RenderError> {
            let (jpeg, width, height) = pdf::normalize_jpeg(&bytes)?;
            Ok(pdf::single_credential_pdf(&jpeg, width, height, &title)?)
        })
        .await??;

        let path = format!("credentials/pdfs/{}.pdf", credential.uuid);
        self.storage.write(&path, &pdf).await?;
        Ok(path)
    }
}
