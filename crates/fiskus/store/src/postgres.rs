//! PostgreSQL adapter for fiskus storage.
//!
//! This adapter is designed as the transactional source-of-truth backend.
//! Documents and devices are stored as JSONB blobs next to the columns the
//! queries need; compare-and-set operations take a row lock so the fiscal
//! result block and the fiscalised flag always change in one transaction.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Acquire, Row};
use uuid::Uuid;

use crate::model::{compute_journal_hash, JournalAppend, JournalFilter, JournalRecord, JournalStage};
use crate::traits::{DeviceStore, DocumentStore, JournalStore, QueryWindow};
use crate::{StoreError, StoreResult};
use fiskus_types::{
    CompanyId, DeviceId, Document, DocumentId, DocumentState, FiscalDevice, FiscalFields,
};

/// PostgreSQL-backed storage adapter.
#[derive(Clone)]
pub struct PostgresFiskusStore {
    pool: PgPool,
}

impl PostgresFiskusStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StoreResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS fiskus_documents (
                document_id TEXT PRIMARY KEY,
                company_id TEXT NOT NULL,
                state TEXT NOT NULL,
                fiscalised BOOLEAN NOT NULL,
                document JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fiskus_devices (
                device_id TEXT PRIMARY KEY,
                company_id TEXT NOT NULL,
                device_no BIGINT NOT NULL,
                device JSONB NOT NULL,
                registered_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (company_id, device_no)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fiskus_journal (
                entry_id TEXT PRIMARY KEY,
                sequence BIGINT NOT NULL UNIQUE,
                timestamp TIMESTAMPTZ NOT NULL,
                stage TEXT NOT NULL,
                success BOOLEAN NOT NULL,
                detail TEXT NOT NULL,
                document_id TEXT,
                device_id TEXT,
                payload JSONB NOT NULL,
                previous_hash TEXT,
                hash TEXT NOT NULL
            )
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresFiskusStore {
    async fn put_document(&self, document: Document) -> StoreResult<()> {
        let document_json = serde_json::to_value(&document)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO fiskus_documents
                (document_id, company_id, state, fiscalised, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(document.id.0.to_string())
        .bind(document.company_id.0.to_string())
        .bind(document_state_to_str(document.state))
        .bind(document.fiscalised)
        .bind(document_json)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        Ok(())
    }

    async fn document(&self, document_id: &DocumentId) -> StoreResult<Option<Document>> {
        let row = sqlx::query("SELECT document FROM fiskus_documents WHERE document_id = $1")
            .bind(document_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(document_row_to_record).transpose()
    }

    async fn list_documents(&self, window: QueryWindow) -> StoreResult<Vec<Document>> {
        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT document FROM fiskus_documents
                 ORDER BY updated_at DESC
                 OFFSET $1
                "#,
            )
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        } else {
            sqlx::query(
                r#"
                SELECT document FROM fiskus_documents
                 ORDER BY updated_at DESC
                 LIMIT $1 OFFSET $2
                "#,
            )
            .bind(to_i64(window.limit)?)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        };

        rows.into_iter().map(document_row_to_record).collect()
    }

    async fn transition_state(
        &self,
        document_id: &DocumentId,
        expected_from: DocumentState,
        to: DocumentState,
    ) -> StoreResult<Document> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = tx
            .acquire()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let row = sqlx::query(
            "SELECT document FROM fiskus_documents WHERE document_id = $1 FOR UPDATE",
        )
        .bind(document_id.0.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some(row) = row else {
            return Err(StoreError::NotFound(format!(
                "document {} not found",
                document_id
            )));
        };
        let mut document = document_row_to_record(row)?;

        if document.state != expected_from {
            return Err(StoreError::InvariantViolation(format!(
                "invalid state transition: expected {:?}, found {:?}",
                expected_from, document.state
            )));
        }
        if document.fiscalised && to != DocumentState::Posted {
            return Err(StoreError::InvariantViolation(format!(
                "document {} is fiscalised and must stay posted",
                document_id
            )));
        }

        document.state = to;
        document.updated_at = Utc::now();
        persist_document(conn, &document).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(document)
    }

    async fn commit_fiscalisation(
        &self,
        document_id: &DocumentId,
        fields: FiscalFields,
    ) -> StoreResult<Document> {
        if !fields.is_complete() {
            return Err(StoreError::InvalidInput(
                "fiscal result block is incomplete".to_string(),
            ));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = tx
            .acquire()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let row = sqlx::query(
            "SELECT document FROM fiskus_documents WHERE document_id = $1 FOR UPDATE",
        )
        .bind(document_id.0.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some(row) = row else {
            return Err(StoreError::NotFound(format!(
                "document {} not found",
                document_id
            )));
        };
        let mut document = document_row_to_record(row)?;

        if document.fiscalised {
            return Err(StoreError::InvariantViolation(format!(
                "document {} is already fiscalised",
                document_id
            )));
        }
        if document.state != DocumentState::Posted {
            return Err(StoreError::InvariantViolation(format!(
                "document {} is not posted: {:?}",
                document_id, document.state
            )));
        }

        document.fiscal = fields;
        document.fiscalised = true;
        document.updated_at = Utc::now();
        persist_document(conn, &document).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(document)
    }
}

#[async_trait]
impl DeviceStore for PostgresFiskusStore {
    async fn register_device(&self, device: FiscalDevice) -> StoreResult<()> {
        let device_json =
            serde_json::to_value(&device).map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO fiskus_devices
                (device_id, company_id, device_no, device, registered_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            "#,
        )
        .bind(device.id.0.to_string())
        .bind(device.company_id.0.to_string())
        .bind(device.device_no)
        .bind(device_json)
        .bind(device.registered_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        Ok(())
    }

    async fn device(&self, device_id: &DeviceId) -> StoreResult<Option<FiscalDevice>> {
        let row = sqlx::query("SELECT device FROM fiskus_devices WHERE device_id = $1")
            .bind(device_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(device_row_to_record).transpose()
    }

    async fn device_for_company(
        &self,
        company_id: &CompanyId,
    ) -> StoreResult<Option<FiscalDevice>> {
        let row = sqlx::query(
            r#"
            SELECT device FROM fiskus_devices
             WHERE company_id = $1
             ORDER BY registered_at ASC
             LIMIT 1
            "#,
        )
        .bind(company_id.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(device_row_to_record).transpose()
    }

    async fn update_device(&self, device: FiscalDevice) -> StoreResult<()> {
        let device_json =
            serde_json::to_value(&device).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE fiskus_devices
               SET device = $2,
                   updated_at = $3
             WHERE device_id = $1
            "#,
        )
        .bind(device.id.0.to_string())
        .bind(device_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "device {} not found",
                device.id
            )));
        }

        Ok(())
    }

    async fn list_devices(&self, window: QueryWindow) -> StoreResult<Vec<FiscalDevice>> {
        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT device FROM fiskus_devices
                 ORDER BY registered_at ASC
                 OFFSET $1
                "#,
            )
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        } else {
            sqlx::query(
                r#"
                SELECT device FROM fiskus_devices
                 ORDER BY registered_at ASC
                 LIMIT $1 OFFSET $2
                "#,
            )
            .bind(to_i64(window.limit)?)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        };

        rows.into_iter().map(device_row_to_record).collect()
    }
}

#[async_trait]
impl JournalStore for PostgresFiskusStore {
    async fn append_entry(&self, entry: JournalAppend) -> StoreResult<JournalRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        sqlx::query("LOCK TABLE fiskus_journal IN EXCLUSIVE MODE")
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let last =
            sqlx::query("SELECT sequence, hash FROM fiskus_journal ORDER BY sequence DESC LIMIT 1")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

        let (sequence, previous_hash) = if let Some(row) = last {
            let seq: i64 = row
                .try_get("sequence")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let prev: String = row
                .try_get("hash")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            (seq + 1, Some(prev))
        } else {
            (1_i64, None)
        };

        let hash = compute_journal_hash(&entry, previous_hash.as_deref(), sequence as u64)?;
        let entry_id = format!("jrn-{}", Uuid::new_v4());

        sqlx::query(
            r#"
            INSERT INTO fiskus_journal
                (entry_id, sequence, timestamp, stage, success, detail, document_id, device_id, payload, previous_hash, hash)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry_id.clone())
        .bind(sequence)
        .bind(entry.timestamp)
        .bind(journal_stage_to_str(entry.stage))
        .bind(entry.success)
        .bind(entry.detail.clone())
        .bind(entry.document_id.as_ref().map(|id| id.0.to_string()))
        .bind(entry.device_id.as_ref().map(|id| id.0.to_string()))
        .bind(entry.payload.clone())
        .bind(previous_hash.clone())
        .bind(hash.clone())
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(JournalRecord {
            entry_id,
            sequence: sequence as u64,
            timestamp: entry.timestamp,
            stage: entry.stage,
            success: entry.success,
            detail: entry.detail,
            document_id: entry.document_id,
            device_id: entry.device_id,
            payload: entry.payload,
            previous_hash,
            hash,
        })
    }

    async fn list_entries(
        &self,
        filter: JournalFilter,
        window: QueryWindow,
    ) -> StoreResult<Vec<JournalRecord>> {
        let stage = filter.stage.map(journal_stage_to_str);
        let document_id = filter.document_id.as_ref().map(|id| id.0.to_string());
        let device_id = filter.device_id.as_ref().map(|id| id.0.to_string());

        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT entry_id, sequence, timestamp, stage, success, detail, document_id, device_id, payload, previous_hash, hash
                  FROM fiskus_journal
                 WHERE ($1::TEXT IS NULL OR stage = $1)
                   AND ($2::TEXT IS NULL OR document_id = $2)
                   AND ($3::TEXT IS NULL OR device_id = $3)
                 ORDER BY sequence DESC
                 OFFSET $4
                "#,
            )
            .bind(stage)
            .bind(document_id)
            .bind(device_id)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        } else {
            sqlx::query(
                r#"
                SELECT entry_id, sequence, timestamp, stage, success, detail, document_id, device_id, payload, previous_hash, hash
                  FROM fiskus_journal
                 WHERE ($1::TEXT IS NULL OR stage = $1)
                   AND ($2::TEXT IS NULL OR document_id = $2)
                   AND ($3::TEXT IS NULL OR device_id = $3)
                 ORDER BY sequence DESC
                 LIMIT $4 OFFSET $5
                "#,
            )
            .bind(stage)
            .bind(document_id)
            .bind(device_id)
            .bind(to_i64(window.limit)?)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        };

        rows.into_iter().map(journal_row_to_record).collect()
    }

    async fn latest_hash(&self) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT hash FROM fiskus_journal ORDER BY sequence DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row
            .map(|r| r.try_get::<String, _>("hash"))
            .transpose()
            .map_err(|e| StoreError::Backend(e.to_string()))?)
    }
}

async fn persist_document(conn: &mut sqlx::PgConnection, document: &Document) -> StoreResult<()> {
    let document_json =
        serde_json::to_value(document).map_err(|e| StoreError::Serialization(e.to_string()))?;

    sqlx::query(
        r#"
        UPDATE fiskus_documents
           SET state = $2,
               fiscalised = $3,
               document = $4,
               updated_at = $5
         WHERE document_id = $1
        "#,
    )
    .bind(document.id.0.to_string())
    .bind(document_state_to_str(document.state))
    .bind(document.fiscalised)
    .bind(document_json)
    .bind(document.updated_at)
    .execute(conn)
    .await
    .map_err(|e| StoreError::Backend(e.to_string()))?;

    Ok(())
}

fn document_row_to_record(row: sqlx::postgres::PgRow) -> StoreResult<Document> {
    let document_json: serde_json::Value = row
        .try_get("document")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    serde_json::from_value(document_json).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn device_row_to_record(row: sqlx::postgres::PgRow) -> StoreResult<FiscalDevice> {
    let device_json: serde_json::Value = row
        .try_get("device")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    serde_json::from_value(device_json).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn journal_row_to_record(row: sqlx::postgres::PgRow) -> StoreResult<JournalRecord> {
    let stage: String = row
        .try_get("stage")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let document_id: Option<String> = row
        .try_get("document_id")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let device_id: Option<String> = row
        .try_get("device_id")
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    Ok(JournalRecord {
        entry_id: row
            .try_get("entry_id")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        sequence: row
            .try_get::<i64, _>("sequence")
            .map_err(|e| StoreError::Backend(e.to_string()))? as u64,
        timestamp: row
            .try_get("timestamp")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        stage: parse_journal_stage(&stage)?,
        success: row
            .try_get("success")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        detail: row
            .try_get("detail")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        document_id: document_id
            .map(|raw| parse_uuid(&raw).map(DocumentId))
            .transpose()?,
        device_id: device_id
            .map(|raw| parse_uuid(&raw).map(DeviceId))
            .transpose()?,
        payload: row
            .try_get("payload")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        previous_hash: row
            .try_get("previous_hash")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        hash: row
            .try_get("hash")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
    })
}

fn document_state_to_str(state: DocumentState) -> &'static str {
    match state {
        DocumentState::Draft => "draft",
        DocumentState::Posted => "posted",
        DocumentState::Cancelled => "cancelled",
    }
}

fn journal_stage_to_str(stage: JournalStage) -> &'static str {
    match stage {
        JournalStage::GateRefused => "gate_refused",
        JournalStage::SubmissionFailed => "submission_failed",
        JournalStage::Fiscalised => "fiscalised",
        JournalStage::DayOpened => "day_opened",
        JournalStage::DayClosed => "day_closed",
        JournalStage::StatusChecked => "status_checked",
        JournalStage::SessionRenewed => "session_renewed",
        JournalStage::DeviceRegistered => "device_registered",
    }
}

fn parse_journal_stage(raw: &str) -> StoreResult<JournalStage> {
    match raw {
        "gate_refused" => Ok(JournalStage::GateRefused),
        "submission_failed" => Ok(JournalStage::SubmissionFailed),
        "fiscalised" => Ok(JournalStage::Fiscalised),
        "day_opened" => Ok(JournalStage::DayOpened),
        "day_closed" => Ok(JournalStage::DayClosed),
        "status_checked" => Ok(JournalStage::StatusChecked),
        "session_renewed" => Ok(JournalStage::SessionRenewed),
        "device_registered" => Ok(JournalStage::DeviceRegistered),
        _ => Err(StoreError::Serialization(format!(
            "unknown journal stage `{raw}`"
        ))),
    }
}

fn parse_uuid(raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn map_sqlx_conflict(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict(db_err.message().to_string());
        }
    }
    StoreError::Backend(err.to_string())
}

fn to_i64(value: usize) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput("window value too large".to_string()))
}
