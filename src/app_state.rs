use std::sync::Arc;

use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::services::credentials::CredentialService;
use crate::services::queue::JobQueue;
use crate::services::renderer::CredentialRenderer;
use crate::services::storage::Storage;
use crate::store::{CredentialStore, PrintBatchStore, TemplateStore};

/// Shared dependencies handed to every worker invocation: stores, blob
/// storage, queue, renderer, an injected clock, and the retry knobs.
/// Everything is a trait object so tests run the whole pipeline in memory.
#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<dyn CredentialStore>,
    pub print_batches: Arc<dyn PrintBatchStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub storage: Arc<dyn Storage>,
    pub queue: Arc<dyn JobQueue>,
    pub renderer: Arc<dyn CredentialRenderer>,
    pub clock: Arc<dyn Clock>,
    pub pipeline: PipelineConfig,
}

impl AppState {
    pub fn credential_service(&self) -> CredentialService {
        CredentialService::new(
            self.credentials.clone(),
            self.renderer.clone(),
            self.clock.clone(),
        )
    }
}
