use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    Credential, CredentialStatus, ErrorSummary, NewCredential, NewPrintBatch, PrintBatch,
    PrintBatchStatus, Template, TemplateSnapshot,
};

use super::{CredentialStore, PrintBatchStore, StoreError, TemplateStore};

/// In-memory credential store for tests and single-node development.
pub struct MemoryCredentialStore {
    rows: Mutex<HashMap<i64, Credential>>,
    next_id: AtomicI64,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Seed a fully formed record, e.g. one already `ready` or `failed`.
    pub fn insert(&self, credential: Credential) {
        self.next_id.fetch_max(credential.id + 1, Ordering::SeqCst);
        self.rows
            .lock()
            .expect("lock poisoned")
            .insert(credential.id, credential);
    }

    fn update<F>(&self, id: i64, apply: F) -> Result<Credential, StoreError>
    where
        F: FnOnce(&mut Credential),
    {
        let mut rows = self.rows.lock().expect("lock poisoned");
        let row = rows
            .get_mut(&id)
            .ok_or(StoreError::CredentialNotFound(id))?;
        apply(row);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, id: i64) -> Result<Option<Credential>, StoreError> {
        Ok(self.rows.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn get_by_request(&self, request_id: i64) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .rows
            .lock()
            .expect("lock poisoned")
            .values()
            .find(|c| c.accreditation_request_id == request_id)
            .cloned())
    }

    async fn create(&self, new: NewCredential) -> Result<Credential, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let credential = Credential {
            id,
            uuid: Uuid::new_v4(),
            accreditation_request_id: new.accreditation_request_id,
            status: CredentialStatus::Pending,
            employee_snapshot: new.employee_snapshot,
            template_snapshot: new.template_snapshot,
            event_snapshot: new.event_snapshot,
            zones_snapshot: new.zones_snapshot,
            qr_code: None,
            qr_image_path: None,
            credential_image_path: None,
            credential_pdf_path: None,
            generated_at: None,
            expires_at: new.expires_at,
            is_active: true,
            printed_at: None,
            print_batch_id: None,
            error_summary: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.rows
            .lock()
            .expect("lock poisoned")
            .insert(id, credential.clone());
        Ok(credential)
    }

    async fn mark_generating(&self, id: i64) -> Result<Credential, StoreError> {
        self.update(id, |c| c.status = CredentialStatus::Generating)
    }

    async fn store_qr(
        &self,
        id: i64,
        qr_code: &str,
        qr_image_path: &str,
    ) -> Result<Credential, StoreError> {
        self.update(id, |c| {
            c.qr_code = Some(qr_code.to_string());
            c.qr_image_path = Some(qr_image_path.to_string());
        })
    }

    async fn store_image_path(&self, id: i64, path: &str) -> Result<Credential, StoreError> {
        self.update(id, |c| c.credential_image_path = Some(path.to_string()))
    }

    async fn store_pdf_path(&self, id: i64, path: &str) -> Result<Credential, StoreError> {
        self.update(id, |c| c.credential_pdf_path = Some(path.to_string()))
    }

    async fn mark_ready(
        &self,
        id: i64,
        generated_at: DateTime<Utc>,
    ) -> Result<Credential, StoreError> {
        self.update(id, |c| {
            c.status = CredentialStatus::Ready;
            c.generated_at = Some(generated_at);
            c.error_summary = None;
        })
    }

    async fn record_failure(&self, id: i64, summary: &ErrorSummary) -> Result<(), StoreError> {
        self.update(id, |c| {
            c.error_summary = Some(summary.clone());
            c.retry_count = summary.attempt as i32;
        })?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, summary: &ErrorSummary) -> Result<(), StoreError> {
        self.update(id, |c| {
            c.status = CredentialStatus::Failed;
            c.error_summary = Some(summary.clone());
            c.retry_count = summary.attempt as i32;
        })?;
        Ok(())
    }

    async fn reset_for_reissue(
        &self,
        id: i64,
        template: &TemplateSnapshot,
    ) -> Result<Credential, StoreError> {
        self.update(id, |c| {
            c.status = CredentialStatus::Pending;
            c.template_snapshot = template.clone();
            c.qr_code = None;
            c.qr_image_path = None;
            c.credential_image_path = None;
            c.credential_pdf_path = None;
            c.generated_at = None;
            c.error_summary = None;
            c.retry_count = 0;
        })
    }

    async fn begin_regeneration(
        &self,
        id: i64,
        template: &TemplateSnapshot,
        regenerate_qr: bool,
    ) -> Result<Credential, StoreError> {
        self.update(id, |c| {
            c.status = CredentialStatus::Generating;
            c.template_snapshot = template.clone();
            c.credential_image_path = None;
            c.credential_pdf_path = None;
            c.error_summary = None;
            if regenerate_qr {
                c.qr_code = None;
                c.qr_image_path = None;
            }
        })
    }

    async fn list_approved_for_event(
        &self,
        event_id: i64,
    ) -> Result<Vec<Credential>, StoreError> {
        let mut rows: Vec<Credential> = self
            .rows
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|c| c.event_id() == event_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.id);
        Ok(rows)
    }

    async fn list_ready_by_ids(
        &self,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<Credential>, StoreError> {
        let rows = self.rows.lock().expect("lock poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id))
            .filter(|c| c.is_ready(now))
            .cloned()
            .collect())
    }

    async fn mark_printed(
        &self,
        ids: &[i64],
        print_batch_id: i64,
        printed_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().expect("lock poisoned");
        let mut stamped = 0;
        for id in ids {
            if let Some(c) = rows.get_mut(id) {
                c.printed_at = Some(printed_at);
                c.print_batch_id = Some(print_batch_id);
                c.updated_at = Utc::now();
                stamped += 1;
            }
        }
        Ok(stamped)
    }

    async fn expire_event_credentials(
        &self,
        event_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().expect("lock poisoned");
        let mut expired = 0;
        for c in rows.values_mut() {
            if c.event_id() == event_id && c.is_active {
                c.is_active = false;
                c.expires_at = Some(now);
                c.updated_at = Utc::now();
                expired += 1;
            }
        }
        Ok(expired)
    }
}

/// In-memory print batch store. Remembers every progress update so tests
/// can assert the chunk cadence.
pub struct MemoryPrintBatchStore {
    rows: Mutex<HashMap<i64, PrintBatch>>,
    progress_log: Mutex<HashMap<i64, Vec<i32>>>,
    next_id: AtomicI64,
}

impl MemoryPrintBatchStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            progress_log: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn insert(&self, batch: PrintBatch) {
        self.next_id.fetch_max(batch.id + 1, Ordering::SeqCst);
        self.rows
            .lock()
            .expect("lock poisoned")
            .insert(batch.id, batch);
    }

    /// Every `update_progress` value seen for `id`, in call order.
    pub fn progress_history(&self, id: i64) -> Vec<i32> {
        self.progress_log
            .lock()
            .expect("lock poisoned")
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    fn update<F>(&self, id: i64, apply: F) -> Result<PrintBatch, StoreError>
    where
        F: FnOnce(&mut PrintBatch),
    {
        let mut rows = self.rows.lock().expect("lock poisoned");
        let row = rows.get_mut(&id).ok_or(StoreError::PrintBatchNotFound(id))?;
        apply(row);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }
}

impl Default for MemoryPrintBatchStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrintBatchStore for MemoryPrintBatchStore {
    async fn get(&self, id: i64) -> Result<Option<PrintBatch>, StoreError> {
        Ok(self.rows.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn create(&self, new: NewPrintBatch) -> Result<PrintBatch, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let batch = PrintBatch {
            id,
            uuid: Uuid::new_v4(),
            event_id: new.event_id,
            area_ids: new.area_ids,
            provider_ids: new.provider_ids,
            generated_by: new.generated_by,
            status: PrintBatchStatus::Queued,
            filters_snapshot: new.filters_snapshot,
            total_credentials: new.total_credentials,
            processed_credentials: 0,
            pdf_path: None,
            started_at: None,
            finished_at: None,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.rows
            .lock()
            .expect("lock poisoned")
            .insert(id, batch.clone());
        Ok(batch)
    }

    async fn mark_processing(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<PrintBatch, StoreError> {
        self.update(id, |b| {
            b.status = PrintBatchStatus::Processing;
            b.started_at = Some(started_at);
            b.finished_at = None;
            b.error_message = None;
            b.processed_credentials = 0;
        })
    }

    async fn update_progress(&self, id: i64, processed: i32) -> Result<(), StoreError> {
        self.update(id, |b| b.processed_credentials = processed)?;
        self.progress_log
            .lock()
            .expect("lock poisoned")
            .entry(id)
            .or_default()
            .push(processed);
        Ok(())
    }

    async fn mark_ready(
        &self,
        id: i64,
        pdf_path: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<PrintBatch, StoreError> {
        self.update(id, |b| {
            b.status = PrintBatchStatus::Ready;
            b.pdf_path = Some(pdf_path.to_string());
            b.finished_at = Some(finished_at);
            b.processed_credentials = b.total_credentials;
        })
    }

    async fn mark_failed(
        &self,
        id: i64,
        error: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<PrintBatch, StoreError> {
        self.update(id, |b| {
            b.status = PrintBatchStatus::Failed;
            b.error_message = Some(error.to_string());
            b.finished_at = Some(finished_at);
            b.retry_count += 1;
        })
    }

    async fn archive(&self, id: i64) -> Result<PrintBatch, StoreError> {
        self.update(id, |b| b.status = PrintBatchStatus::Archived)
    }
}

/// In-memory template store.
#[derive(Default)]
pub struct MemoryTemplateStore {
    rows: Mutex<HashMap<i64, Template>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, template: Template) {
        self.rows
            .lock()
            .expect("lock poisoned")
            .insert(template.id, template);
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn get(&self, id: i64) -> Result<Option<Template>, StoreError> {
        Ok(self.rows.lock().expect("lock poisoned").get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmployeeSnapshot, EventSnapshot, ZonesSnapshot};
    use chrono::Duration;

    fn new_credential(request_id: i64) -> NewCredential {
        let now = Utc::now();
        NewCredential {
            accreditation_request_id: request_id,
            employee_snapshot: EmployeeSnapshot {
                schema_version: 1,
                employee_id: 1,
                full_name: "Test Person".into(),
                document_number: "D-1".into(),
                job_title: "Steward".into(),
                provider_name: "Acme".into(),
                photo_path: None,
                captured_at: now,
            },
            template_snapshot: template_snapshot(1, now),
            event_snapshot: EventSnapshot {
                schema_version: 1,
                event_id: 3,
                name: "Cup Final".into(),
                starts_at: now,
                ends_at: now + Duration::days(1),
                captured_at: now,
            },
            zones_snapshot: ZonesSnapshot {
                schema_version: 1,
                zones: vec![],
                captured_at: now,
            },
            expires_at: Some(now + Duration::days(1)),
        }
    }

    fn template_snapshot(version: i32, now: DateTime<Utc>) -> TemplateSnapshot {
        TemplateSnapshot {
            schema_version: 1,
            template_id: 1,
            name: "press".into(),
            file_path: "templates/press.png".into(),
            layout: serde_json::from_value(serde_json::json!({
                "qr": { "x": 0, "y": 0, "width": 10, "height": 10 },
            }))
            .unwrap(),
            template_version: version,
            captured_at: now,
        }
    }

    #[tokio::test]
    async fn reissue_reset_drops_all_artifacts() {
        let store = MemoryCredentialStore::new();
        let created = store.create(new_credential(10)).await.unwrap();
        store.store_qr(created.id, "CRD-abc", "qr.png").await.unwrap();
        store.store_image_path(created.id, "img.jpg").await.unwrap();
        store.store_pdf_path(created.id, "doc.pdf").await.unwrap();
        store.mark_ready(created.id, Utc::now()).await.unwrap();

        let fresh = template_snapshot(2, Utc::now());
        let reset = store.reset_for_reissue(created.id, &fresh).await.unwrap();

        assert_eq!(reset.status, CredentialStatus::Pending);
        assert_eq!(reset.qr_code, None);
        assert_eq!(reset.qr_image_path, None);
        assert_eq!(reset.credential_image_path, None);
        assert_eq!(reset.credential_pdf_path, None);
        assert_eq!(reset.generated_at, None);
        assert_eq!(reset.template_snapshot.template_version, 2);
    }

    #[tokio::test]
    async fn regeneration_keeps_qr_unless_asked() {
        let store = MemoryCredentialStore::new();
        let created = store.create(new_credential(11)).await.unwrap();
        store.store_qr(created.id, "CRD-keep", "qr.png").await.unwrap();
        store.store_image_path(created.id, "img.jpg").await.unwrap();

        let snap = template_snapshot(2, Utc::now());
        let kept = store
            .begin_regeneration(created.id, &snap, false)
            .await
            .unwrap();
        assert_eq!(kept.status, CredentialStatus::Generating);
        assert_eq!(kept.qr_code.as_deref(), Some("CRD-keep"));
        assert_eq!(kept.credential_image_path, None);

        let dropped = store
            .begin_regeneration(created.id, &snap, true)
            .await
            .unwrap();
        assert_eq!(dropped.qr_code, None);
        assert_eq!(dropped.qr_image_path, None);
    }

    #[tokio::test]
    async fn mark_printed_is_a_plain_stamp() {
        let store = MemoryCredentialStore::new();
        let a = store.create(new_credential(20)).await.unwrap();
        let b = store.create(new_credential(21)).await.unwrap();

        let at = Utc::now();
        let stamped = store.mark_printed(&[a.id, b.id, 999], 7, at).await.unwrap();
        assert_eq!(stamped, 2);

        // Restamping is harmless.
        let again = store.mark_printed(&[a.id, b.id], 7, at).await.unwrap();
        assert_eq!(again, 2);
        let a = store.get(a.id).await.unwrap().unwrap();
        assert_eq!(a.print_batch_id, Some(7));
        assert_eq!(a.printed_at, Some(at));
    }

    #[tokio::test]
    async fn expiring_twice_counts_once() {
        let store = MemoryCredentialStore::new();
        store.create(new_credential(30)).await.unwrap();
        store.create(new_credential(31)).await.unwrap();

        let now = Utc::now();
        assert_eq!(store.expire_event_credentials(3, now).await.unwrap(), 2);
        assert_eq!(store.expire_event_credentials(3, now).await.unwrap(), 0);
    }
}
