use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{
    Credential, CredentialStatus, ErrorSummary, NewCredential, NewPrintBatch, PrintBatch,
    PrintBatchStatus, Template, TemplateSnapshot,
};

use super::{CredentialStore, PrintBatchStore, StoreError, TemplateStore};

const CREDENTIAL_COLUMNS: &str = "id, uuid, accreditation_request_id, status, \
     employee_snapshot, template_snapshot, event_snapshot, zones_snapshot, \
     qr_code, qr_image_path, credential_image_path, credential_pdf_path, \
     generated_at, expires_at, is_active, printed_at, print_batch_id, \
     error_message, retry_count, created_at, updated_at";

const PRINT_BATCH_COLUMNS: &str = "id, uuid, event_id, area_ids, provider_ids, generated_by, \
     status, filters_snapshot, total_credentials, processed_credentials, \
     pdf_path, started_at, finished_at, error_message, retry_count, \
     created_at, updated_at";

fn decode_json<T: DeserializeOwned>(
    column: &'static str,
    value: serde_json::Value,
) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|source| StoreError::Json { column, source })
}

fn encode_json<T: Serialize>(
    column: &'static str,
    value: &T,
) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|source| StoreError::Json { column, source })
}

fn credential_from_row(row: &PgRow) -> Result<Credential, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = CredentialStatus::from_str(&status_str)
        .map_err(|_| StoreError::UnknownStatus(status_str))?;

    let error_summary = row
        .try_get::<Option<serde_json::Value>, _>("error_message")?
        .map(|v| decode_json::<ErrorSummary>("error_message", v))
        .transpose()?;

    Ok(Credential {
        id: row.try_get("id")?,
        uuid: row.try_get("uuid")?,
        accreditation_request_id: row.try_get("accreditation_request_id")?,
        status,
        employee_snapshot: decode_json("employee_snapshot", row.try_get("employee_snapshot")?)?,
        template_snapshot: decode_json("template_snapshot", row.try_get("template_snapshot")?)?,
        event_snapshot: decode_json("event_snapshot", row.try_get("event_snapshot")?)?,
        zones_snapshot: decode_json("zones_snapshot", row.try_get("zones_snapshot")?)?,
        qr_code: row.try_get("qr_code")?,
        qr_image_path: row.try_get("qr_image_path")?,
        credential_image_path: row.try_get("credential_image_path")?,
        credential_pdf_path: row.try_get("credential_pdf_path")?,
        generated_at: row.try_get("generated_at")?,
        expires_at: row.try_get("expires_at")?,
        is_active: row.try_get("is_active")?,
        printed_at: row.try_get("printed_at")?,
        print_batch_id: row.try_get("print_batch_id")?,
        error_summary,
        retry_count: row.try_get("retry_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn print_batch_from_row(row: &PgRow) -> Result<PrintBatch, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = PrintBatchStatus::from_str(&status_str)
        .map_err(|_| StoreError::UnknownStatus(status_str))?;

    Ok(PrintBatch {
        id: row.try_get("id")?,
        uuid: row.try_get("uuid")?,
        event_id: row.try_get("event_id")?,
        area_ids: row.try_get("area_ids")?,
        provider_ids: row.try_get("provider_ids")?,
        generated_by: row.try_get("generated_by")?,
        status,
        filters_snapshot: decode_json("filters_snapshot", row.try_get("filters_snapshot")?)?,
        total_credentials: row.try_get("total_credentials")?,
        processed_credentials: row.try_get("processed_credentials")?,
        pdf_path: row.try_get("pdf_path")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Credential persistence on PostgreSQL.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run an UPDATE ... RETURNING and map the row; a vanished row is an
    /// error at this layer, not a soft miss.
    async fn updated_row(
        &self,
        id: i64,
        query: Query<'_, Postgres, PgArguments>,
    ) -> Result<Credential, StoreError> {
        let row = query
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::CredentialNotFound(id))?;
        credential_from_row(&row)
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn get(&self, id: i64) -> Result<Option<Credential>, StoreError> {
        let sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn get_by_request(&self, request_id: i64) -> Result<Option<Credential>, StoreError> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE accreditation_request_id = $1"
        );
        let row = sqlx::query(&sql)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn create(&self, new: NewCredential) -> Result<Credential, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO credentials
                (uuid, accreditation_request_id, status,
                 employee_snapshot, template_snapshot, event_snapshot, zones_snapshot,
                 expires_at)
            VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7)
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(new.accreditation_request_id)
            .bind(encode_json("employee_snapshot", &new.employee_snapshot)?)
            .bind(encode_json("template_snapshot", &new.template_snapshot)?)
            .bind(encode_json("event_snapshot", &new.event_snapshot)?)
            .bind(encode_json("zones_snapshot", &new.zones_snapshot)?)
            .bind(new.expires_at)
            .fetch_one(&self.pool)
            .await?;
        credential_from_row(&row)
    }

    async fn mark_generating(&self, id: i64) -> Result<Credential, StoreError> {
        let sql = format!(
            r#"
            UPDATE credentials
            SET status = 'generating', updated_at = NOW()
            WHERE id = $1
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        );
        self.updated_row(id, sqlx::query(&sql).bind(id)).await
    }

    async fn store_qr(
        &self,
        id: i64,
        qr_code: &str,
        qr_image_path: &str,
    ) -> Result<Credential, StoreError> {
        let sql = format!(
            r#"
            UPDATE credentials
            SET qr_code = $2, qr_image_path = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        );
        self.updated_row(
            id,
            sqlx::query(&sql).bind(id).bind(qr_code).bind(qr_image_path),
        )
        .await
    }

    async fn store_image_path(&self, id: i64, path: &str) -> Result<Credential, StoreError> {
        let sql = format!(
            r#"
            UPDATE credentials
            SET credential_image_path = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        );
        self.updated_row(id, sqlx::query(&sql).bind(id).bind(path)).await
    }

    async fn store_pdf_path(&self, id: i64, path: &str) -> Result<Credential, StoreError> {
        let sql = format!(
            r#"
            UPDATE credentials
            SET credential_pdf_path = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        );
        self.updated_row(id, sqlx::query(&sql).bind(id).bind(path)).await
    }

    async fn mark_ready(
        &self,
        id: i64,
        generated_at: DateTime<Utc>,
    ) -> Result<Credential, StoreError> {
        let sql = format!(
            r#"
            UPDATE credentials
            SET status = 'ready', generated_at = $2, error_message = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        );
        self.updated_row(id, sqlx::query(&sql).bind(id).bind(generated_at))
            .await
    }

    async fn record_failure(&self, id: i64, summary: &ErrorSummary) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET error_message = $2, retry_count = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(encode_json("error_message", summary)?)
        .bind(summary.attempt as i32)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::CredentialNotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, summary: &ErrorSummary) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET status = 'failed', error_message = $2, retry_count = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(encode_json("error_message", summary)?)
        .bind(summary.attempt as i32)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::CredentialNotFound(id));
        }
        Ok(())
    }

    async fn reset_for_reissue(
        &self,
        id: i64,
        template: &TemplateSnapshot,
    ) -> Result<Credential, StoreError> {
        let snapshot = encode_json("template_snapshot", template)?;
        let sql = format!(
            r#"
            UPDATE credentials
            SET status = 'pending',
                template_snapshot = $2,
                qr_code = NULL,
                qr_image_path = NULL,
                credential_image_path = NULL,
                credential_pdf_path = NULL,
                generated_at = NULL,
                error_message = NULL,
                retry_count = 0,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        );
        self.updated_row(id, sqlx::query(&sql).bind(id).bind(snapshot))
            .await
    }

    async fn begin_regeneration(
        &self,
        id: i64,
        template: &TemplateSnapshot,
        regenerate_qr: bool,
    ) -> Result<Credential, StoreError> {
        let snapshot = encode_json("template_snapshot", template)?;
        let sql = format!(
            r#"
            UPDATE credentials
            SET status = 'generating',
                template_snapshot = $2,
                credential_image_path = NULL,
                credential_pdf_path = NULL,
                error_message = NULL,
                qr_code = CASE WHEN $3 THEN NULL ELSE qr_code END,
                qr_image_path = CASE WHEN $3 THEN NULL ELSE qr_image_path END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        );
        self.updated_row(
            id,
            sqlx::query(&sql).bind(id).bind(snapshot).bind(regenerate_qr),
        )
        .await
    }

    async fn list_approved_for_event(
        &self,
        event_id: i64,
    ) -> Result<Vec<Credential>, StoreError> {
        let sql = format!(
            r#"
            SELECT {CREDENTIAL_COLUMNS}
            FROM credentials
            WHERE (event_snapshot ->> 'event_id')::BIGINT = $1
            ORDER BY id ASC
            "#
        );
        let rows = sqlx::query(&sql).bind(event_id).fetch_all(&self.pool).await?;
        rows.iter().map(credential_from_row).collect()
    }

    async fn list_ready_by_ids(
        &self,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<Credential>, StoreError> {
        let sql = format!(
            r#"
            SELECT {CREDENTIAL_COLUMNS}
            FROM credentials
            WHERE id = ANY($1)
              AND status = 'ready'
              AND is_active = TRUE
              AND (expires_at IS NULL OR expires_at > $2)
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(ids)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(credential_from_row).collect()
    }

    async fn mark_printed(
        &self,
        ids: &[i64],
        print_batch_id: i64,
        printed_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET printed_at = $2, print_batch_id = $3, updated_at = NOW()
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(printed_at)
        .bind(print_batch_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire_event_credentials(
        &self,
        event_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET is_active = FALSE, expires_at = $2, updated_at = NOW()
            WHERE (event_snapshot ->> 'event_id')::BIGINT = $1
              AND is_active = TRUE
            "#,
        )
        .bind(event_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Print batch persistence on PostgreSQL.
#[derive(Clone)]
pub struct PgPrintBatchStore {
    pool: PgPool,
}

impl PgPrintBatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn updated_row(
        &self,
        id: i64,
        query: Query<'_, Postgres, PgArguments>,
    ) -> Result<PrintBatch, StoreError> {
        let row = query
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::PrintBatchNotFound(id))?;
        print_batch_from_row(&row)
    }
}

#[async_trait]
impl PrintBatchStore for PgPrintBatchStore {
    async fn get(&self, id: i64) -> Result<Option<PrintBatch>, StoreError> {
        let sql = format!("SELECT {PRINT_BATCH_COLUMNS} FROM print_batches WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(print_batch_from_row).transpose()
    }

    async fn create(&self, new: NewPrintBatch) -> Result<PrintBatch, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO print_batches
                (uuid, event_id, area_ids, provider_ids, generated_by, status,
                 filters_snapshot, total_credentials)
            VALUES ($1, $2, $3, $4, $5, 'queued', $6, $7)
            RETURNING {PRINT_BATCH_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(new.event_id)
            .bind(&new.area_ids)
            .bind(&new.provider_ids)
            .bind(new.generated_by)
            .bind(encode_json("filters_snapshot", &new.filters_snapshot)?)
            .bind(new.total_credentials)
            .fetch_one(&self.pool)
            .await?;
        print_batch_from_row(&row)
    }

    async fn mark_processing(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<PrintBatch, StoreError> {
        let sql = format!(
            r#"
            UPDATE print_batches
            SET status = 'processing',
                started_at = $2,
                finished_at = NULL,
                error_message = NULL,
                processed_credentials = 0,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PRINT_BATCH_COLUMNS}
            "#
        );
        self.updated_row(id, sqlx::query(&sql).bind(id).bind(started_at))
            .await
    }

    async fn update_progress(&self, id: i64, processed: i32) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE print_batches
            SET processed_credentials = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(processed)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::PrintBatchNotFound(id));
        }
        Ok(())
    }

    async fn mark_ready(
        &self,
        id: i64,
        pdf_path: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<PrintBatch, StoreError> {
        let sql = format!(
            r#"
            UPDATE print_batches
            SET status = 'ready',
                pdf_path = $2,
                finished_at = $3,
                processed_credentials = total_credentials,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PRINT_BATCH_COLUMNS}
            "#
        );
        self.updated_row(
            id,
            sqlx::query(&sql).bind(id).bind(pdf_path).bind(finished_at),
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: i64,
        error: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<PrintBatch, StoreError> {
        let sql = format!(
            r#"
            UPDATE print_batches
            SET status = 'failed',
                error_message = $2,
                finished_at = $3,
                retry_count = retry_count + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PRINT_BATCH_COLUMNS}
            "#
        );
        self.updated_row(id, sqlx::query(&sql).bind(id).bind(error).bind(finished_at))
            .await
    }

    async fn archive(&self, id: i64) -> Result<PrintBatch, StoreError> {
        let sql = format!(
            r#"
            UPDATE print_batches
            SET status = 'archived', updated_at = NOW()
            WHERE id = $1
            RETURNING {PRINT_BATCH_COLUMNS}
            "#
        );
        self.updated_row(id, sqlx::query(&sql).bind(id)).await
    }
}

/// Template reads on PostgreSQL.
#[derive(Clone)]
pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn get(&self, id: i64) -> Result<Option<Template>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, file_path, layout, version, created_at, updated_at
            FROM credential_templates
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(Template {
                id: r.try_get("id")?,
                name: r.try_get("name")?,
                file_path: r.try_get("file_path")?,
                layout: decode_json("layout", r.try_get("layout")?)?,
                version: r.try_get("version")?,
                created_at: r.try_get("created_at")?,
                updated_at: r.try_get("updated_at")?,
            })
        })
        .transpose()
    }
}
