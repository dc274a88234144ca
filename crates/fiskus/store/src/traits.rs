use async_trait::async_trait;

use crate::model::{JournalAppend, JournalFilter, JournalRecord};
use crate::StoreResult;
use fiskus_types::{
    CompanyId, DeviceId, Document, DocumentId, DocumentState, FiscalDevice, FiscalFields,
};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Storage interface for accounting documents under fiscal control.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document.
    async fn put_document(&self, document: Document) -> StoreResult<()>;

    /// Get one document by id.
    async fn document(&self, document_id: &DocumentId) -> StoreResult<Option<Document>>;

    /// List documents newest-first.
    async fn list_documents(&self, window: QueryWindow) -> StoreResult<Vec<Document>>;

    /// Transition document state from one value to another.
    ///
    /// Fails when the current state differs from `expected_from`. A
    /// fiscalised document never leaves `Posted`.
    async fn transition_state(
        &self,
        document_id: &DocumentId,
        expected_from: DocumentState,
        to: DocumentState,
    ) -> StoreResult<Document>;

    /// Set the fiscalised flag and attach the complete result block in one
    /// write. Only valid for a posted document that is not yet fiscalised;
    /// `fields` must be fully populated.
    async fn commit_fiscalisation(
        &self,
        document_id: &DocumentId,
        fields: FiscalFields,
    ) -> StoreResult<Document>;
}

/// Storage interface for registered fiscal devices.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Insert a newly registered device. One device number per company.
    async fn register_device(&self, device: FiscalDevice) -> StoreResult<()>;

    /// Get one device by id.
    async fn device(&self, device_id: &DeviceId) -> StoreResult<Option<FiscalDevice>>;

    /// Earliest registered device of a company.
    async fn device_for_company(&self, company_id: &CompanyId)
        -> StoreResult<Option<FiscalDevice>>;

    /// Replace a stored device record.
    async fn update_device(&self, device: FiscalDevice) -> StoreResult<()>;

    /// List devices in registration order.
    async fn list_devices(&self, window: QueryWindow) -> StoreResult<Vec<FiscalDevice>>;
}

/// Storage interface for the append-only fiscal journal.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Append an entry and return the canonical, hash-linked stored record.
    async fn append_entry(&self, entry: JournalAppend) -> StoreResult<JournalRecord>;

    /// Read matching entries newest-first.
    async fn list_entries(
        &self,
        filter: JournalFilter,
        window: QueryWindow,
    ) -> StoreResult<Vec<JournalRecord>>;

    /// Get the latest journal hash anchor.
    async fn latest_hash(&self) -> StoreResult<Option<String>>;
}

/// Unified storage bundle used by fiskus surfaces.
pub trait FiskusStore: DocumentStore + DeviceStore + JournalStore + Send + Sync {}

impl<T> FiskusStore for T where T: DocumentStore + DeviceStore + JournalStore + Send + Sync {}
