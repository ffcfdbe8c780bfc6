//! Shared test harness: the whole pipeline over in-memory stores, a local
//! temp-dir blob store, a manual clock, and a counting fake renderer.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use credential_pipeline::app_state::AppState;
use credential_pipeline::clock::{Clock, ManualClock};
use credential_pipeline::config::PipelineConfig;
use credential_pipeline::models::{
    ApprovedRequest, Credential, CredentialStatus, EmployeeSnapshot, EventSnapshot, LayoutMeta,
    RectPx, Template, TemplateSnapshot, ZoneEntry, ZonesSnapshot,
};
use credential_pipeline::services::queue::{JobEnvelope, JobPayload, MemoryQueue};
use credential_pipeline::services::renderer::{CredentialRenderer, QrArtifact, RenderError};
use credential_pipeline::services::storage::{LocalStorage, Storage, StorageError};
use credential_pipeline::store::{
    MemoryCredentialStore, MemoryPrintBatchStore, MemoryTemplateStore,
};

/// Renderer double: counts calls, returns deterministic paths, and can be
/// scripted to fail image rendering.
pub struct FakeRenderer {
    pub qr_calls: AtomicUsize,
    pub image_calls: AtomicUsize,
    pub pdf_calls: AtomicUsize,
    image_failures_remaining: AtomicUsize,
    fail_image_for: Mutex<HashSet<i64>>,
    seq: AtomicUsize,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self {
            qr_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
            pdf_calls: AtomicUsize::new(0),
            image_failures_remaining: AtomicUsize::new(0),
            fail_image_for: Mutex::new(HashSet::new()),
            seq: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` image renders, then succeed.
    pub fn fail_next_images(&self, n: usize) {
        self.image_failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Fail every image render for this credential.
    pub fn always_fail_image_for(&self, credential_id: i64) {
        self.fail_image_for
            .lock()
            .unwrap()
            .insert(credential_id);
    }

    fn injected_failure() -> RenderError {
        RenderError::Storage(StorageError::NotFound("injected failure".to_string()))
    }
}

#[async_trait]
impl CredentialRenderer for FakeRenderer {
    async fn render_qr(&self, credential: &Credential) -> Result<QrArtifact, RenderError> {
        self.qr_calls.fetch_add(1, Ordering::SeqCst);
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        Ok(QrArtifact {
            payload: format!("CRD-fake-{n}"),
            image_path: format!("credentials/qr/{}.png", credential.uuid),
        })
    }

    async fn render_image(&self, credential: &Credential) -> Result<String, RenderError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_image_for.lock().unwrap().contains(&credential.id) {
            return Err(Self::injected_failure());
        }
        let remaining = self.image_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.image_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(Self::injected_failure());
        }
        Ok(format!("credentials/images/{}.jpg", credential.uuid))
    }

    async fn render_pdf(&self, credential: &Credential) -> Result<String, RenderError> {
        self.pdf_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("credentials/pdfs/{}.pdf", credential.uuid))
    }
}

pub struct Harness {
    pub state: AppState,
    pub credentials: Arc<MemoryCredentialStore>,
    pub print_batches: Arc<MemoryPrintBatchStore>,
    pub templates: Arc<MemoryTemplateStore>,
    pub queue: Arc<MemoryQueue>,
    pub clock: Arc<ManualClock>,
    pub renderer: Arc<FakeRenderer>,
    pub storage: Arc<LocalStorage>,
    _storage_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let credentials = Arc::new(MemoryCredentialStore::new());
        let print_batches = Arc::new(MemoryPrintBatchStore::new());
        let templates = Arc::new(MemoryTemplateStore::new());
        let queue = Arc::new(MemoryQueue::new(clock.clone()));
        let renderer = Arc::new(FakeRenderer::new());
        let storage_dir = tempfile::tempdir().expect("tempdir");
        let storage = Arc::new(LocalStorage::new(storage_dir.path()));

        let state = AppState {
            credentials: credentials.clone(),
            print_batches: print_batches.clone(),
            templates: templates.clone(),
            storage: storage.clone(),
            queue: queue.clone(),
            renderer: renderer.clone(),
            clock: clock.clone(),
            pipeline: PipelineConfig::default(),
        };

        Self {
            state,
            credentials,
            print_batches,
            templates,
            queue,
            clock,
            renderer,
            storage,
            _storage_dir: storage_dir,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn enqueue(&self, payload: JobPayload) {
        let envelope = JobEnvelope::new(payload, self.now());
        self.state.queue.enqueue(&envelope).await.expect("enqueue");
    }

    /// Seed a fully `ready` credential for `event_id`; artifact paths are
    /// set but no files are written.
    pub fn seed_ready_credential(&self, id: i64, event_id: i64) -> Credential {
        let now = self.now();
        let uuid = Uuid::new_v4();
        let credential = Credential {
            id,
            uuid,
            accreditation_request_id: 1000 + id,
            status: CredentialStatus::Ready,
            employee_snapshot: employee_snapshot(id, now),
            template_snapshot: template_snapshot(&template(1, 1, now), now),
            event_snapshot: event_snapshot(event_id, now),
            zones_snapshot: zones_snapshot(now),
            qr_code: Some(format!("CRD-seeded-{id}")),
            qr_image_path: Some(format!("credentials/qr/{uuid}.png")),
            credential_image_path: Some(format!("credentials/images/{uuid}.jpg")),
            credential_pdf_path: Some(format!("credentials/pdfs/{uuid}.pdf")),
            generated_at: Some(now),
            expires_at: Some(now + Duration::days(30)),
            is_active: true,
            printed_at: None,
            print_batch_id: None,
            error_summary: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.credentials.insert(credential.clone());
        credential
    }

    /// Seed a ready credential and write real badge artwork at its image
    /// path so batch assembly can composite it.
    pub async fn seed_ready_with_image(
        &self,
        id: i64,
        event_id: i64,
        width: u32,
        height: u32,
    ) -> Credential {
        let credential = self.seed_ready_credential(id, event_id);
        let path = credential.credential_image_path.clone().unwrap();
        self.storage
            .write(&path, &badge_jpeg(width, height))
            .await
            .expect("write badge");
        credential
    }
}

pub fn employee_snapshot(id: i64, now: DateTime<Utc>) -> EmployeeSnapshot {
    EmployeeSnapshot {
        schema_version: 1,
        employee_id: id,
        full_name: format!("Employee {id}"),
        document_number: format!("DOC-{id:04}"),
        job_title: "Technician".into(),
        provider_name: "Provider SA".into(),
        photo_path: None,
        captured_at: now,
    }
}

pub fn event_snapshot(event_id: i64, now: DateTime<Utc>) -> EventSnapshot {
    EventSnapshot {
        schema_version: 1,
        event_id,
        name: format!("Event {event_id}"),
        starts_at: now,
        ends_at: now + Duration::days(30),
        captured_at: now,
    }
}

pub fn zones_snapshot(now: DateTime<Utc>) -> ZonesSnapshot {
    ZonesSnapshot {
        schema_version: 1,
        zones: vec![
            ZoneEntry {
                zone_id: 1,
                code: "1".into(),
                name: "Field".into(),
            },
            ZoneEntry {
                zone_id: 2,
                code: "4".into(),
                name: "Media center".into(),
            },
        ],
        captured_at: now,
    }
}

pub fn template(id: i64, version: i32, now: DateTime<Utc>) -> Template {
    Template {
        id,
        name: "standard".into(),
        file_path: format!("templates/standard_v{version}.png"),
        layout: LayoutMeta {
            fold_x_px: None,
            photo: Some(RectPx {
                x: 40,
                y: 120,
                width: 300,
                height: 400,
            }),
            qr: RectPx {
                x: 1180,
                y: 760,
                width: 200,
                height: 200,
            },
            text_blocks: vec![],
        },
        version,
        created_at: now,
        updated_at: now,
    }
}

pub fn template_snapshot(template: &Template, now: DateTime<Utc>) -> TemplateSnapshot {
    TemplateSnapshot::capture(template, now)
}

pub fn approved_request(id: i64, event_id: i64, now: DateTime<Utc>) -> ApprovedRequest {
    ApprovedRequest {
        id,
        employee: employee_snapshot(id, now),
        event: event_snapshot(event_id, now),
        zones: zones_snapshot(now),
        template: template(1, 1, now),
    }
}

/// Small solid-color JPEG with the given dimensions.
pub fn badge_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([30, 80, 160]));
    let mut bytes = Vec::new();
    img.write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(
        &mut bytes, 90,
    ))
    .expect("encode jpeg");
    bytes
}
