//! In-memory reference implementation for fiskus storage traits.
//!
//! This adapter is deterministic and test-friendly. Production deployments
//! should use a transactional backend (e.g. PostgreSQL) for source-of-truth data.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::model::{compute_journal_hash, JournalAppend, JournalFilter, JournalRecord};
use crate::traits::{DeviceStore, DocumentStore, JournalStore, QueryWindow};
use crate::{StoreError, StoreResult};
use fiskus_types::{
    CompanyId, DeviceId, Document, DocumentId, DocumentState, FiscalDevice, FiscalFields,
};

/// In-memory fiskus storage adapter.
#[derive(Default)]
pub struct InMemoryFiskusStore {
    documents: RwLock<HashMap<DocumentId, Document>>,
    devices: RwLock<HashMap<DeviceId, FiscalDevice>>,
    journal: RwLock<Vec<JournalRecord>>,
}

impl InMemoryFiskusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryFiskusStore {
    async fn put_document(&self, document: Document) -> StoreResult<()> {
        let mut guard = self
            .documents
            .write()
            .map_err(|_| StoreError::Backend("documents lock poisoned".to_string()))?;

        if guard.contains_key(&document.id) {
            return Err(StoreError::Conflict(format!(
                "document {} already exists",
                document.id
            )));
        }

        guard.insert(document.id.clone(), document);
        Ok(())
    }

    async fn document(&self, document_id: &DocumentId) -> StoreResult<Option<Document>> {
        let guard = self
            .documents
            .read()
            .map_err(|_| StoreError::Backend("documents lock poisoned".to_string()))?;
        Ok(guard.get(document_id).cloned())
    }

    async fn list_documents(&self, window: QueryWindow) -> StoreResult<Vec<Document>> {
        let guard = self
            .documents
            .read()
            .map_err(|_| StoreError::Backend("documents lock poisoned".to_string()))?;
        let mut values = guard.values().cloned().collect::<Vec<_>>();
        values.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(apply_window(values, window))
    }

    async fn transition_state(
        &self,
        document_id: &DocumentId,
        expected_from: DocumentState,
        to: DocumentState,
    ) -> StoreResult<Document> {
        let mut guard = self
            .documents
            .write()
            .map_err(|_| StoreError::Backend("documents lock poisoned".to_string()))?;
        let record = guard.get_mut(document_id).ok_or_else(|| {
            StoreError::NotFound(format!("document {} not found", document_id))
        })?;

        if record.state != expected_from {
            return Err(StoreError::InvariantViolation(format!(
                "invalid state transition: expected {:?}, found {:?}",
                expected_from, record.state
            )));
        }
        if record.fiscalised && to != DocumentState::Posted {
            return Err(StoreError::InvariantViolation(format!(
                "document {} is fiscalised and must stay posted",
                document_id
            )));
        }

        record.state = to;
        record.updated_at = Utc::now();
        Ok(record.clone())
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

        let mut guard = self
            .documents
            .write()
            .map_err(|_| StoreError::Backend("documents lock poisoned".to_string()))?;
        let record = guard.get_mut(document_id).ok_or_else(|| {
            StoreError::NotFound(format!("document {} not found", document_id))
        })?;

        if record.fiscalised {
            return Err(StoreError::InvariantViolation(format!(
                "document {} is already fiscalised",
                document_id
            )));
        }
        if record.state != DocumentState::Posted {
            return Err(StoreError::InvariantViolation(format!(
                "document {} is not posted: {:?}",
                document_id, record.state
            )));
        }

        // Flag and fields change under one write guard.
        record.fiscal = fields;
        record.fiscalised = true;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

#[async_trait]
impl DeviceStore for InMemoryFiskusStore {
    async fn register_device(&self, device: FiscalDevice) -> StoreResult<()> {
        let mut guard = self
            .devices
            .write()
            .map_err(|_| StoreError::Backend("devices lock poisoned".to_string()))?;

        if guard.contains_key(&device.id) {
            return Err(StoreError::Conflict(format!(
                "device {} already exists",
                device.id
            )));
        }
        if guard
            .values()
            .any(|d| d.company_id == device.company_id && d.device_no == device.device_no)
        {
            return Err(StoreError::Conflict(format!(
                "device number {} already registered for company {}",
                device.device_no, device.company_id
            )));
        }

        guard.insert(device.id.clone(), device);
        Ok(())
    }

    async fn device(&self, device_id: &DeviceId) -> StoreResult<Option<FiscalDevice>> {
        let guard = self
            .devices
            .read()
            .map_err(|_| StoreError::Backend("devices lock poisoned".to_string()))?;
        Ok(guard.get(device_id).cloned())
    }

    async fn device_for_company(
        &self,
        company_id: &CompanyId,
    ) -> StoreResult<Option<FiscalDevice>> {
        let guard = self
            .devices
            .read()
            .map_err(|_| StoreError::Backend("devices lock poisoned".to_string()))?;
        let mut candidates = guard
            .values()
            .filter(|d| &d.company_id == company_id)
            .cloned()
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(candidates.into_iter().next())
    }

    async fn update_device(&self, device: FiscalDevice) -> StoreResult<()> {
        let mut guard = self
            .devices
            .write()
            .map_err(|_| StoreError::Backend("devices lock poisoned".to_string()))?;
        if !guard.contains_key(&device.id) {
            return Err(StoreError::NotFound(format!(
                "device {} not found",
                device.id
            )));
        }
        guard.insert(device.id.clone(), device);
        Ok(())
    }

    async fn list_devices(&self, window: QueryWindow) -> StoreResult<Vec<FiscalDevice>> {
        let guard = self
            .devices
            .read()
            .map_err(|_| StoreError::Backend("devices lock poisoned".to_string()))?;
        let mut values = guard.values().cloned().collect::<Vec<_>>();
        values.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(apply_window(values, window))
    }
}

#[async_trait]
impl JournalStore for InMemoryFiskusStore {
    async fn append_entry(&self, entry: JournalAppend) -> StoreResult<JournalRecord> {
        let mut guard = self
            .journal
            .write()
            .map_err(|_| StoreError::Backend("journal lock poisoned".to_string()))?;

        let previous_hash = guard.last().map(|e| e.hash.clone());
        let sequence = guard.len() as u64 + 1;
        let hash = compute_journal_hash(&entry, previous_hash.as_deref(), sequence)?;

        let record = JournalRecord {
            entry_id: format!("jrn-{}", Uuid::new_v4()),
            sequence,
            timestamp: entry.timestamp,
            stage: entry.stage,
            success: entry.success,
            detail: entry.detail,
            document_id: entry.document_id,
            device_id: entry.device_id,
            payload: entry.payload,
            previous_hash,
            hash,
        };

        guard.push(record.clone());
        Ok(record)
    }

    async fn list_entries(
        &self,
        filter: JournalFilter,
        window: QueryWindow,
    ) -> StoreResult<Vec<JournalRecord>> {
        let guard = self
            .journal
            .read()
            .map_err(|_| StoreError::Backend("journal lock poisoned".to_string()))?;
        let mut values = guard
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(apply_window(values, window))
    }

    async fn latest_hash(&self) -> StoreResult<Option<String>> {
        let guard = self
            .journal
            .read()
            .map_err(|_| StoreError::Backend("journal lock poisoned".to_string()))?;
        Ok(guard.last().map(|e| e.hash.clone()))
    }
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}
