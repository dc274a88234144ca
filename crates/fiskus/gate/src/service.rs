//! The fiscalisation gate.
//!
//! One entry point, [`FiscalGate::fiscalise`], owns the whole path
//! from command to committed receipt. Preconditions are re-checked on
//! every invocation against the stored record, refusals and failures
//! are journalled, and the document is only ever written through the
//! single-shot fiscal commit. A failure anywhere leaves the document
//! exactly as it was.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use fiskus_device::{record_device_fault, DeviceLink};
use fiskus_store::{
    DeviceStore, DocumentStore, JournalAppend, JournalStage, JournalStore, StoreError,
};
use fiskus_types::{
    Document, DocumentId, DocumentState, FiscalConfirmation, FiscalDevice, FiscalFields,
};

use crate::error::{GateError, GateRefusal, GateResult};
use crate::receipt::assemble_receipt;
use crate::surface::{fiscal_integrity_breach, surface_view, SurfaceView};

/// Request to fiscalise one document.
///
/// Carries the document identity and nothing else; all state is read
/// fresh from the store when the command runs.
#[derive(Clone, Debug)]
pub struct FiscaliseCommand {
    pub document_id: DocumentId,
}

/// Result of a successful fiscalisation.
#[derive(Clone, Debug)]
pub struct FiscalisationOutcome {
    /// The document as stored after the fiscal commit.
    pub document: Document,
    /// The confirmation returned by the device.
    pub confirmation: FiscalConfirmation,
}

/// Gate service in front of the fiscal device.
pub struct FiscalGate {
    documents: Arc<dyn DocumentStore>,
    devices: Arc<dyn DeviceStore>,
    journal: Arc<dyn JournalStore>,
    link: Arc<dyn DeviceLink>,
}

impl FiscalGate {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        devices: Arc<dyn DeviceStore>,
        journal: Arc<dyn JournalStore>,
        link: Arc<dyn DeviceLink>,
    ) -> Self {
        Self {
            documents,
            devices,
            journal,
            link,
        }
    }

    /// Fiscalise one document end to end.
    pub async fn fiscalise(&self, command: FiscaliseCommand) -> GateResult<FiscalisationOutcome> {
        info!(document = %command.document_id, "fiscalisation requested");

        // Stage 1: the gate predicate against the stored record.
        let document = self.load_document(&command.document_id).await?;
        if document.fiscalised {
            return self.refuse(document, GateRefusal::AlreadyFiscalised).await;
        }
        if document.state != DocumentState::Posted {
            let state = document.state;
            return self.refuse(document, GateRefusal::NotPosted { state }).await;
        }
        if let Some(detail) = fiscal_integrity_breach(&document) {
            warn!(document = %document.id, detail = %detail, "refusing to fiscalise over inconsistent data");
            self.journal_failure(&document, None, &detail).await?;
            return Err(GateError::Inconsistent {
                document: document.id,
                detail,
            });
        }

        // Stage 2: a device with an open fiscal day.
        let device = match self.devices.device_for_company(&document.company_id).await? {
            Some(device) => device,
            None => {
                let detail = format!("no fiscal device for company {}", document.company_id);
                warn!(document = %document.id, detail = %detail, "fiscalisation failed");
                self.journal_failure(&document, None, &detail).await?;
                return Err(GateError::DeviceUnavailable(document.company_id));
            }
        };
        if !device.is_day_open() {
            let detail = format!("fiscal day closed on device {}", device.serial);
            warn!(document = %document.id, device = %device.id, "fiscal day closed");
            self.journal_failure(&document, Some(&device), &detail).await?;
            return Err(GateError::DayClosed(device.id));
        }

        // Stage 3: assemble the submission.
        let receipt = match assemble_receipt(&document) {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(document = %document.id, error = %e, "receipt assembly failed");
                self.journal_failure(&document, Some(&device), &e.to_string())
                    .await?;
                return Err(GateError::Assembly(e));
            }
        };
        debug!(
            document = %document.id,
            lines = receipt.lines.len(),
            total = %receipt.total,
            "receipt assembled"
        );

        // Stage 4: submit to the device.
        let confirmation = match self.link.submit_receipt(&device, &receipt).await {
            Ok(confirmation) => confirmation,
            Err(fault) => {
                warn!(
                    document = %document.id,
                    device = %device.id,
                    fault = %fault,
                    "device rejected the submission"
                );
                if let Err(e) = record_device_fault(self.devices.as_ref(), &device, &fault).await {
                    warn!(device = %device.id, error = %e, "device fault not persisted");
                }
                self.journal_failure(&document, Some(&device), &fault.to_string())
                    .await?;
                return Err(GateError::Link {
                    device: device.id,
                    fault,
                });
            }
        };

        // Stage 5: flag and result block land in one write.
        let fields = FiscalFields::from_confirmation(device.id.clone(), &confirmation);
        let stored = match self
            .documents
            .commit_fiscalisation(&document.id, fields)
            .await
        {
            Ok(stored) => stored,
            Err(StoreError::InvariantViolation(detail)) => {
                // Another writer got there first; report the current state.
                let current = self.load_document(&document.id).await?;
                warn!(document = %current.id, detail = %detail, "fiscal commit lost a concurrent race");
                let reason = if current.fiscalised {
                    GateRefusal::AlreadyFiscalised
                } else {
                    GateRefusal::NotPosted {
                        state: current.state,
                    }
                };
                return self.refuse(current, reason).await;
            }
            Err(e) => return Err(e.into()),
        };

        // The receipt is committed; nothing below may fail the call.
        let mut tracked = device.clone();
        tracked.last_receipt_global_number = confirmation.receipt_global_number;
        tracked.last_receipt_number = confirmation.receipt_number;
        tracked.fiscal_day_no = Some(confirmation.fiscal_day_no);
        tracked.last_operation = Some(confirmation.fiscal_date);
        if let Err(e) = self.devices.update_device(tracked).await {
            warn!(device = %device.id, error = %e, "device counters not updated after commit");
        }
        if let Err(e) = self
            .journal
            .append_entry(JournalAppend {
                timestamp: Utc::now(),
                stage: JournalStage::Fiscalised,
                success: true,
                detail: format!("receipt {} registered", confirmation.receipt_global_number),
                document_id: Some(stored.id.clone()),
                device_id: Some(device.id.clone()),
                payload: json!({
                    "receipt_global_number": confirmation.receipt_global_number,
                    "receipt_number": confirmation.receipt_number,
                    "fiscal_day_no": confirmation.fiscal_day_no,
                    "device_serial": confirmation.device_serial,
                }),
            })
            .await
        {
            warn!(document = %stored.id, error = %e, "fiscalisation not journalled");
        }

        info!(
            document = %stored.id,
            device = %device.id,
            receipt_global_number = confirmation.receipt_global_number,
            "document fiscalised"
        );
        Ok(FiscalisationOutcome {
            document: stored,
            confirmation,
        })
    }

    /// Evaluate the form surface for one document.
    pub async fn surface(&self, document_id: &DocumentId) -> GateResult<SurfaceView> {
        let document = self.load_document(document_id).await?;
        if let Some(detail) = fiscal_integrity_breach(&document) {
            warn!(document = %document.id, detail = %detail, "fiscal integrity breach on render");
        }
        Ok(surface_view(&document))
    }

    async fn load_document(&self, document_id: &DocumentId) -> GateResult<Document> {
        self.documents
            .document(document_id)
            .await?
            .ok_or_else(|| GateError::DocumentNotFound(document_id.clone()))
    }

    async fn refuse(
        &self,
        document: Document,
        reason: GateRefusal,
    ) -> GateResult<FiscalisationOutcome> {
        warn!(document = %document.id, reason = %reason, "fiscalisation refused");
        self.journal
            .append_entry(JournalAppend {
                timestamp: Utc::now(),
                stage: JournalStage::GateRefused,
                success: false,
                detail: reason.to_string(),
                document_id: Some(document.id.clone()),
                device_id: None,
                payload: json!({
                    "state": document.state,
                    "fiscalised": document.fiscalised,
                }),
            })
            .await?;
        Err(GateError::Refused {
            document: document.id,
            reason,
        })
    }

    async fn journal_failure(
        &self,
        document: &Document,
        device: Option<&FiscalDevice>,
        detail: &str,
    ) -> GateResult<()> {
        self.journal
            .append_entry(JournalAppend {
                timestamp: Utc::now(),
                stage: JournalStage::SubmissionFailed,
                success: false,
                detail: detail.to_string(),
                document_id: Some(document.id.clone()),
                device_id: device.map(|device| device.id.clone()),
                payload: json!({}),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssemblyError;
    use crate::surface::FiscalStatus;
    use fiskus_device::{MockDeviceLink, SimulatedDevice};
    use fiskus_store::{memory::InMemoryFiskusStore, JournalFilter, QueryWindow};
    use fiskus_types::{
        CompanyId, Counterparty, DeviceId, DocumentKind, DocumentLine, FiscalDayStatus,
        FiscalDevice, LineTax, FAULT_DUPLICATE_RECEIPT,
    };
    use rust_decimal_macros::dec;

    fn posted_document(company: &CompanyId, number: &str) -> Document {
        Document {
            id: DocumentId::new(),
            company_id: company.clone(),
            number: number.to_string(),
            kind: DocumentKind::Invoice,
            state: DocumentState::Posted,
            currency: "USD".to_string(),
            counterparty: Counterparty {
                name: "Acme Ltd".to_string(),
                trade_name: None,
                vat: None,
                tin: None,
                email: None,
                phone: None,
                address: None,
            },
            reference: None,
            reversed_number: None,
            lines: vec![DocumentLine {
                name: "Widget".to_string(),
                hs_code: Some("8471".to_string()),
                quantity: dec!(2),
                unit_price: dec!(10.00),
                discount_percent: dec!(0),
                tax: Some(LineTax {
                    percent: dec!(15),
                    price_inclusive: true,
                }),
            }],
            total: dec!(20.00),
            fiscalised: false,
            fiscal: FiscalFields::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn open_device(company: &CompanyId) -> FiscalDevice {
        FiscalDevice {
            id: DeviceId::new(),
            company_id: company.clone(),
            label: "Till 1".to_string(),
            device_no: 1,
            serial: "DEV-01".to_string(),
            activation_key: "0000-1111".to_string(),
            day_status: FiscalDayStatus::Opened,
            fiscal_day_no: Some(1),
            last_receipt_global_number: 0,
            last_receipt_number: 0,
            fiscal_day_counters: serde_json::Value::Null,
            session: None,
            last_operation: None,
            last_status_check: None,
            last_fault: None,
            registered_at: Utc::now(),
        }
    }

    fn setup_gate(link: Arc<dyn DeviceLink>) -> (FiscalGate, Arc<InMemoryFiskusStore>) {
        let store = Arc::new(InMemoryFiskusStore::new());
        let gate = FiscalGate::new(store.clone(), store.clone(), store.clone(), link);
        (gate, store)
    }

    fn command(document: &Document) -> FiscaliseCommand {
        FiscaliseCommand {
            document_id: document.id.clone(),
        }
    }

    #[tokio::test]
    async fn posting_then_fiscalising_walks_the_whole_surface() {
        let link = Arc::new(MockDeviceLink::confirm_all().with_next_global(42));
        let (gate, store) = setup_gate(link);
        let company = CompanyId::new();
        let mut document = posted_document(&company, "INV-0001");
        document.state = DocumentState::Draft;
        store.put_document(document.clone()).await.unwrap();
        store.register_device(open_device(&company)).await.unwrap();

        // Draft: nothing fiscal on the form.
        let view = gate.surface(&document.id).await.unwrap();
        assert_eq!(view.status, FiscalStatus::Unfiscalisable);
        assert!(!view.fiscalise_action);
        assert!(view.fiscal_panel.is_none());

        // Posting makes the action appear on the next render.
        store
            .transition_state(&document.id, DocumentState::Draft, DocumentState::Posted)
            .await
            .unwrap();
        let view = gate.surface(&document.id).await.unwrap();
        assert_eq!(view.status, FiscalStatus::Fiscalisable);
        assert!(view.fiscalise_action);
        assert!(view.fiscal_panel.is_none());

        // Fiscalising swaps the action for the panel.
        let outcome = gate.fiscalise(command(&document)).await.unwrap();
        assert!(outcome.document.fiscalised);
        assert_eq!(outcome.confirmation.receipt_global_number, 42);

        let view = gate.surface(&document.id).await.unwrap();
        assert_eq!(view.status, FiscalStatus::Fiscalised);
        assert!(!view.fiscalise_action);
        let panel = view.fiscal_panel.unwrap();
        assert_eq!(panel.device_serial.as_deref(), Some("DEV-01"));
        assert_eq!(panel.receipt_global_number, Some(42));
    }

    #[tokio::test]
    async fn failed_submission_leaves_the_document_untouched() {
        let link = Arc::new(MockDeviceLink::fail_all());
        let (gate, store) = setup_gate(link);
        let company = CompanyId::new();
        let document = posted_document(&company, "INV-0001");
        store.put_document(document.clone()).await.unwrap();
        let device = open_device(&company);
        store.register_device(device.clone()).await.unwrap();

        let before = store.document(&document.id).await.unwrap().unwrap();
        let result = gate.fiscalise(command(&document)).await;
        assert!(matches!(result, Err(GateError::Link { .. })));

        // Field for field, nothing changed.
        let after = store.document(&document.id).await.unwrap().unwrap();
        assert_eq!(after, before);
        assert!(!after.fiscalised);
        assert!(after.fiscal.is_empty());

        // The action stays available for a retry.
        let view = gate.surface(&document.id).await.unwrap();
        assert!(view.fiscalise_action);

        // The fault landed on the device and in the journal.
        let stored_device = store.device(&device.id).await.unwrap().unwrap();
        assert_eq!(stored_device.last_fault.unwrap().code, "CONNECTION_REFUSED");
        let failures = store
            .list_entries(
                JournalFilter::for_stage(JournalStage::SubmissionFailed),
                QueryWindow::default(),
            )
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
    }

    #[tokio::test]
    async fn second_invocation_is_refused_without_a_submission() {
        let link = Arc::new(MockDeviceLink::confirm_all());
        let (gate, store) = setup_gate(link.clone());
        let company = CompanyId::new();
        let document = posted_document(&company, "INV-0001");
        store.put_document(document.clone()).await.unwrap();
        store.register_device(open_device(&company)).await.unwrap();

        gate.fiscalise(command(&document)).await.unwrap();
        let once = store.document(&document.id).await.unwrap().unwrap();

        let result = gate.fiscalise(command(&document)).await;
        assert!(matches!(
            result,
            Err(GateError::Refused {
                reason: GateRefusal::AlreadyFiscalised,
                ..
            })
        ));
        // No second receipt went out and nothing changed.
        assert_eq!(link.submissions(), 1);
        let twice = store.document(&document.id).await.unwrap().unwrap();
        assert_eq!(twice, once);
    }

    #[tokio::test]
    async fn unposted_documents_are_refused() {
        let link = Arc::new(MockDeviceLink::confirm_all());
        let (gate, store) = setup_gate(link.clone());
        let company = CompanyId::new();
        let mut draft = posted_document(&company, "INV-0001");
        draft.state = DocumentState::Draft;
        store.put_document(draft.clone()).await.unwrap();
        store.register_device(open_device(&company)).await.unwrap();

        let result = gate.fiscalise(command(&draft)).await;
        assert!(matches!(
            result,
            Err(GateError::Refused {
                reason: GateRefusal::NotPosted {
                    state: DocumentState::Draft
                },
                ..
            })
        ));
        assert_eq!(link.submissions(), 0);

        let refusals = store
            .list_entries(
                JournalFilter::for_stage(JournalStage::GateRefused),
                QueryWindow::default(),
            )
            .await
            .unwrap();
        assert_eq!(refusals.len(), 1);
        assert!(!refusals[0].success);
    }

    #[tokio::test]
    async fn missing_device_blocks_the_gate() {
        let link = Arc::new(MockDeviceLink::confirm_all());
        let (gate, store) = setup_gate(link);
        let company = CompanyId::new();
        let document = posted_document(&company, "INV-0001");
        store.put_document(document.clone()).await.unwrap();

        let result = gate.fiscalise(command(&document)).await;
        assert!(matches!(result, Err(GateError::DeviceUnavailable(_))));

        let after = store.document(&document.id).await.unwrap().unwrap();
        assert!(!after.fiscalised);
    }

    #[tokio::test]
    async fn closed_fiscal_day_blocks_the_submission() {
        let link = Arc::new(MockDeviceLink::confirm_all());
        let (gate, store) = setup_gate(link.clone());
        let company = CompanyId::new();
        let document = posted_document(&company, "INV-0001");
        store.put_document(document.clone()).await.unwrap();
        let mut device = open_device(&company);
        device.day_status = FiscalDayStatus::Closed;
        store.register_device(device).await.unwrap();

        let result = gate.fiscalise(command(&document)).await;
        assert!(matches!(result, Err(GateError::DayClosed(_))));
        assert_eq!(link.submissions(), 0);
    }

    #[tokio::test]
    async fn assembly_error_never_reaches_the_device() {
        let link = Arc::new(MockDeviceLink::confirm_all());
        let (gate, store) = setup_gate(link.clone());
        let company = CompanyId::new();
        let mut document = posted_document(&company, "INV-0001");
        document.lines[0].hs_code = None;
        store.put_document(document.clone()).await.unwrap();
        store.register_device(open_device(&company)).await.unwrap();

        let result = gate.fiscalise(command(&document)).await;
        assert!(matches!(
            result,
            Err(GateError::Assembly(AssemblyError::MissingHsCode { .. }))
        ));
        assert_eq!(link.submissions(), 0);

        let after = store.document(&document.id).await.unwrap().unwrap();
        assert!(!after.fiscalised);
        assert!(after.fiscal.is_empty());
    }

    #[tokio::test]
    async fn half_written_fiscal_data_is_reported_as_inconsistent() {
        let link = Arc::new(MockDeviceLink::confirm_all());
        let (gate, store) = setup_gate(link.clone());
        let company = CompanyId::new();
        let mut document = posted_document(&company, "INV-0001");
        document.fiscal.qr_url = Some("https://verify.example/x".to_string());
        store.put_document(document.clone()).await.unwrap();
        store.register_device(open_device(&company)).await.unwrap();

        let result = gate.fiscalise(command(&document)).await;
        assert!(matches!(result, Err(GateError::Inconsistent { .. })));
        assert_eq!(link.submissions(), 0);

        // The form still renders rather than erroring out.
        let view = gate.surface(&document.id).await.unwrap();
        assert_eq!(view.status, FiscalStatus::Fiscalisable);
    }

    #[tokio::test]
    async fn duplicate_receipt_fault_carries_the_device_code() {
        let sim = Arc::new(SimulatedDevice::new());
        let (gate, store) = setup_gate(sim.clone());
        let company = CompanyId::new();
        let device = open_device(&company);
        sim.open_day(&device).await.unwrap();
        store.register_device(device).await.unwrap();

        let first = posted_document(&company, "INV-0001");
        store.put_document(first.clone()).await.unwrap();
        gate.fiscalise(command(&first)).await.unwrap();

        // A second document under the same invoice number is rejected
        // by the device, not by the gate.
        let second = posted_document(&company, "INV-0001");
        store.put_document(second.clone()).await.unwrap();
        let result = gate.fiscalise(command(&second)).await;
        match result {
            Err(GateError::Link { fault, .. }) => {
                assert_eq!(fault.code, FAULT_DUPLICATE_RECEIPT)
            }
            other => panic!("expected a device fault, got {other:?}"),
        }
        let after = store.document(&second.id).await.unwrap().unwrap();
        assert!(!after.fiscalised);
    }

    #[tokio::test]
    async fn concurrent_invocations_fiscalise_exactly_once() {
        let link = Arc::new(MockDeviceLink::confirm_all());
        let (gate, store) = setup_gate(link);
        let company = CompanyId::new();
        let document = posted_document(&company, "INV-0001");
        store.put_document(document.clone()).await.unwrap();
        store.register_device(open_device(&company)).await.unwrap();

        let (first, second) = tokio::join!(
            gate.fiscalise(command(&document)),
            gate.fiscalise(command(&document)),
        );
        let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);

        let stored = store.document(&document.id).await.unwrap().unwrap();
        assert!(stored.fiscalised);
        assert!(stored.fiscal.is_complete());
    }

    #[tokio::test]
    async fn success_updates_device_counters_and_journal() {
        let link = Arc::new(MockDeviceLink::confirm_all().with_next_global(42));
        let (gate, store) = setup_gate(link);
        let company = CompanyId::new();
        let document = posted_document(&company, "INV-0001");
        store.put_document(document.clone()).await.unwrap();
        let device = open_device(&company);
        store.register_device(device.clone()).await.unwrap();

        gate.fiscalise(command(&document)).await.unwrap();

        let stored_device = store.device(&device.id).await.unwrap().unwrap();
        assert_eq!(stored_device.last_receipt_global_number, 42);
        assert!(stored_device.last_operation.is_some());

        let entries = store
            .list_entries(
                JournalFilter::for_document(document.id.clone()),
                QueryWindow::default(),
            )
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stage, JournalStage::Fiscalised);
        assert!(entries[0].success);
        assert_eq!(entries[0].payload["receipt_global_number"], 42);
    }
}
