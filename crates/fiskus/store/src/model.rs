use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{StoreError, StoreResult};
use fiskus_types::{DeviceId, DocumentId};

/// Lifecycle stages recorded in the fiscal journal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStage {
    GateRefused,
    SubmissionFailed,
    Fiscalised,
    DayOpened,
    DayClosed,
    StatusChecked,
    SessionRenewed,
    DeviceRegistered,
}

/// Journal append payload. Hashes and sequencing are assigned by storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalAppend {
    pub timestamp: DateTime<Utc>,
    pub stage: JournalStage,
    pub success: bool,
    pub detail: String,
    pub document_id: Option<DocumentId>,
    pub device_id: Option<DeviceId>,
    #[serde(default)]
    pub payload: Value,
}

/// Persistent tamper-evident journal record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalRecord {
    pub entry_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub stage: JournalStage,
    pub success: bool,
    pub detail: String,
    pub document_id: Option<DocumentId>,
    pub device_id: Option<DeviceId>,
    pub payload: Value,
    pub previous_hash: Option<String>,
    pub hash: String,
}

/// Filter for journal reads. An empty filter matches every record.
#[derive(Clone, Debug, Default)]
pub struct JournalFilter {
    pub stage: Option<JournalStage>,
    pub document_id: Option<DocumentId>,
    pub device_id: Option<DeviceId>,
}

impl JournalFilter {
    pub fn for_stage(stage: JournalStage) -> Self {
        Self {
            stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn for_document(document_id: DocumentId) -> Self {
        Self {
            document_id: Some(document_id),
            ..Self::default()
        }
    }

    pub fn for_device(device_id: DeviceId) -> Self {
        Self {
            device_id: Some(device_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &JournalRecord) -> bool {
        if let Some(stage) = self.stage {
            if record.stage != stage {
                return false;
            }
        }
        if let Some(document_id) = &self.document_id {
            if record.document_id.as_ref() != Some(document_id) {
                return false;
            }
        }
        if let Some(device_id) = &self.device_id {
            if record.device_id.as_ref() != Some(device_id) {
                return false;
            }
        }
        true
    }
}

pub(crate) fn compute_journal_hash(
    entry: &JournalAppend,
    previous_hash: Option<&str>,
    sequence: u64,
) -> StoreResult<String> {
    let serializable = serde_json::json!({
        "previous_hash": previous_hash,
        "sequence": sequence,
        "timestamp": entry.timestamp,
        "stage": entry.stage,
        "success": entry.success,
        "detail": entry.detail,
        "document_id": entry.document_id.as_ref().map(|id| id.0),
        "device_id": entry.device_id.as_ref().map(|id| id.0),
        "payload": entry.payload,
    });
    let serialized = serde_json::to_vec(&serializable)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}

/// Recomputes the hash chain oldest-first and checks every link.
pub fn verify_journal(records: &[JournalRecord]) -> bool {
    let mut previous_hash: Option<String> = None;
    for record in records {
        if record.previous_hash != previous_hash {
            return false;
        }
        let entry = JournalAppend {
            timestamp: record.timestamp,
            stage: record.stage,
            success: record.success,
            detail: record.detail.clone(),
            document_id: record.document_id.clone(),
            device_id: record.device_id.clone(),
            payload: record.payload.clone(),
        };
        match compute_journal_hash(&entry, previous_hash.as_deref(), record.sequence) {
            Ok(expected) if expected == record.hash => {}
            _ => return false,
        }
        previous_hash = Some(record.hash.clone());
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(detail: &str) -> JournalAppend {
        JournalAppend {
            timestamp: Utc::now(),
            stage: JournalStage::Fiscalised,
            success: true,
            detail: detail.to_string(),
            document_id: Some(DocumentId::new()),
            device_id: None,
            payload: serde_json::json!({"receipt_global_number": 1}),
        }
    }

    fn chain(entries: Vec<JournalAppend>) -> Vec<JournalRecord> {
        let mut records = Vec::new();
        let mut previous_hash: Option<String> = None;
        for (i, entry) in entries.into_iter().enumerate() {
            let sequence = i as u64 + 1;
            let hash = compute_journal_hash(&entry, previous_hash.as_deref(), sequence).unwrap();
            records.push(JournalRecord {
                entry_id: format!("jrn-{}", uuid::Uuid::new_v4()),
                sequence,
                timestamp: entry.timestamp,
                stage: entry.stage,
                success: entry.success,
                detail: entry.detail,
                document_id: entry.document_id,
                device_id: entry.device_id,
                payload: entry.payload,
                previous_hash: previous_hash.clone(),
                hash: hash.clone(),
            });
            previous_hash = Some(hash);
        }
        records
    }

    #[test]
    fn verifies_hash_chain() {
        let records = chain(vec![entry("first"), entry("second"), entry("third")]);
        assert!(verify_journal(&records));
    }

    #[test]
    fn detects_tampered_entries() {
        let mut records = chain(vec![entry("first"), entry("second")]);
        records[0].payload = serde_json::json!({"receipt_global_number": 999});
        assert!(!verify_journal(&records));
    }

    #[test]
    fn detects_broken_links() {
        let mut records = chain(vec![entry("first"), entry("second")]);
        records[1].previous_hash = Some("0".repeat(64));
        assert!(!verify_journal(&records));
    }

    #[test]
    fn filter_matches_by_stage_and_document() {
        let records = chain(vec![entry("only")]);
        let record = &records[0];
        let document_id = record.document_id.clone().unwrap();

        assert!(JournalFilter::default().matches(record));
        assert!(JournalFilter::for_stage(JournalStage::Fiscalised).matches(record));
        assert!(!JournalFilter::for_stage(JournalStage::GateRefused).matches(record));
        assert!(JournalFilter::for_document(document_id).matches(record));
        assert!(!JournalFilter::for_document(DocumentId::new()).matches(record));
        assert!(!JournalFilter::for_device(DeviceId::new()).matches(record));
    }
}
