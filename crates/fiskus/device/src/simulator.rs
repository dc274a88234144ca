//! In-process fiscal device used by the daemon demo profile and tests.
//!
//! The simulator keeps per-device state behind an async lock and
//! mimics the fault behaviour of a real device: submissions against a
//! closed day and duplicate invoice numbers are rejected with the same
//! fault codes a real backend returns.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::RwLock;

use fiskus_types::{
    DayClosed, DayOpened, DeviceFault, DeviceId, DeviceStatusReport, FiscalConfirmation,
    FiscalDayStatus, FiscalDevice, FiscalReceipt, SessionToken, FAULT_DAY_NOT_OPEN,
    FAULT_DUPLICATE_RECEIPT,
};

use crate::link::DeviceLink;

const SESSION_HOURS: i64 = 12;

#[derive(Default)]
struct SimState {
    day_open: bool,
    fiscal_day_no: i64,
    last_global: i64,
    receipt_in_day: i64,
    seen_invoices: HashSet<String>,
}

/// Simulated fiscal device backend.
#[derive(Default)]
pub struct SimulatedDevice {
    states: RwLock<HashMap<DeviceId, SimState>>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

fn verification_code(serial: &str, global: i64, invoice_number: &str) -> String {
    let material = format!("{serial}:{global}:{invoice_number}");
    let hash = blake3::hash(material.as_bytes()).to_hex().to_string();
    hash[..16].to_uppercase()
}

#[async_trait]
impl DeviceLink for SimulatedDevice {
    fn transport(&self) -> &'static str {
        "simulated"
    }

    async fn issue_session(&self, _device: &FiscalDevice) -> Result<SessionToken, DeviceFault> {
        Ok(SessionToken {
            access_token: uuid::Uuid::new_v4().to_string(),
            refresh_token: uuid::Uuid::new_v4().to_string(),
            expires_at: Utc::now() + Duration::hours(SESSION_HOURS),
        })
    }

    async fn open_day(&self, device: &FiscalDevice) -> Result<DayOpened, DeviceFault> {
        let mut states = self.states.write().await;
        let state = states.entry(device.id.clone()).or_default();
        if state.day_open {
            return Err(DeviceFault::new(
                "INVALID_OPERATION_STATE",
                "fiscal day is already open",
            )
            .with_status(422));
        }
        state.day_open = true;
        state.fiscal_day_no += 1;
        state.receipt_in_day = 0;
        Ok(DayOpened {
            fiscal_day_no: state.fiscal_day_no,
            opened_at: Utc::now(),
        })
    }

    async fn close_day(&self, device: &FiscalDevice) -> Result<DayClosed, DeviceFault> {
        let mut states = self.states.write().await;
        let state = states.entry(device.id.clone()).or_default();
        if !state.day_open {
            return Err(DeviceFault::new(
                "INVALID_OPERATION_STATE",
                "no fiscal day is open",
            )
            .with_status(422));
        }
        state.day_open = false;
        Ok(DayClosed {
            fiscal_day_no: state.fiscal_day_no,
            last_receipt_global_number: state.last_global,
            closed_at: Utc::now(),
        })
    }

    async fn probe_status(&self, device: &FiscalDevice) -> Result<DeviceStatusReport, DeviceFault> {
        let states = self.states.read().await;
        let Some(state) = states.get(&device.id) else {
            return Ok(DeviceStatusReport {
                day_status: FiscalDayStatus::Closed,
                fiscal_day_no: None,
                last_receipt_global_number: 0,
                last_receipt_number: 0,
                day_counters: json!([]),
                checked_at: Utc::now(),
            });
        };
        let day_status = if state.day_open {
            FiscalDayStatus::Opened
        } else {
            FiscalDayStatus::Closed
        };
        let fiscal_day_no = (state.fiscal_day_no > 0).then_some(state.fiscal_day_no);
        Ok(DeviceStatusReport {
            day_status,
            fiscal_day_no,
            last_receipt_global_number: state.last_global,
            last_receipt_number: state.receipt_in_day,
            day_counters: json!([]),
            checked_at: Utc::now(),
        })
    }

    async fn submit_receipt(
        &self,
        device: &FiscalDevice,
        receipt: &FiscalReceipt,
    ) -> Result<FiscalConfirmation, DeviceFault> {
        let mut states = self.states.write().await;
        let state = states.entry(device.id.clone()).or_default();
        if !state.day_open {
            return Err(DeviceFault::new(
                FAULT_DAY_NOT_OPEN,
                "fiscal day is not open",
            )
            .with_status(422));
        }
        if state.seen_invoices.contains(&receipt.invoice_number) {
            return Err(DeviceFault::new(
                FAULT_DUPLICATE_RECEIPT,
                "receipt already registered for this invoice",
            )
            .with_status(422));
        }
        state.seen_invoices.insert(receipt.invoice_number.clone());
        state.last_global += 1;
        state.receipt_in_day += 1;
        Ok(FiscalConfirmation {
            device_serial: device.serial.clone(),
            qr_url: format!(
                "https://verify.example/{}/{:010}",
                device.serial, state.last_global
            ),
            fiscal_date: Utc::now(),
            receipt_global_number: state.last_global,
            receipt_number: state.receipt_in_day,
            fiscal_day_no: state.fiscal_day_no,
            verification_code: verification_code(
                &device.serial,
                state.last_global,
                &receipt.invoice_number,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiskus_types::{
        CompanyId, PaymentMethod, ReceiptKind, ReceiptLine, ReceiptLineKind, ReceiptPayment,
    };
    use rust_decimal_macros::dec;

    fn sim_device() -> FiscalDevice {
        FiscalDevice {
            id: DeviceId::new(),
            company_id: CompanyId::new(),
            label: "Till 1".to_string(),
            device_no: 1,
            serial: "SIM-0001".to_string(),
            activation_key: "0000-1111".to_string(),
            day_status: FiscalDayStatus::Closed,
            fiscal_day_no: None,
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

    fn sim_receipt(invoice_number: &str) -> FiscalReceipt {
        FiscalReceipt {
            kind: ReceiptKind::FiscalInvoice,
            currency: "USD".to_string(),
            invoice_number: invoice_number.to_string(),
            buyer: None,
            notes: None,
            credit_debit_reference: None,
            lines_tax_inclusive: true,
            lines: vec![ReceiptLine {
                kind: ReceiptLineKind::Sale,
                number: 1,
                hs_code: "8471".to_string(),
                name: "Widget".to_string(),
                unit_price: dec!(10.00),
                quantity: dec!(1),
                total: dec!(10.00),
                tax_percent: Some(dec!(15)),
            }],
            payments: vec![ReceiptPayment {
                method: PaymentMethod::Cash,
                amount: dec!(10.00),
            }],
            total: dec!(10.00),
        }
    }

    #[tokio::test]
    async fn submission_requires_an_open_day() {
        let sim = SimulatedDevice::new();
        let device = sim_device();

        let result = sim.submit_receipt(&device, &sim_receipt("INV-001")).await;
        let fault = result.unwrap_err();
        assert_eq!(fault.code, FAULT_DAY_NOT_OPEN);
    }

    #[tokio::test]
    async fn duplicate_invoice_is_rejected() {
        let sim = SimulatedDevice::new();
        let device = sim_device();
        sim.open_day(&device).await.unwrap();

        sim.submit_receipt(&device, &sim_receipt("INV-001"))
            .await
            .unwrap();
        let result = sim.submit_receipt(&device, &sim_receipt("INV-001")).await;
        let fault = result.unwrap_err();
        assert_eq!(fault.code, FAULT_DUPLICATE_RECEIPT);
        assert_eq!(fault.status, Some(422));
    }

    #[tokio::test]
    async fn counters_survive_day_rollover() {
        let sim = SimulatedDevice::new();
        let device = sim_device();

        sim.open_day(&device).await.unwrap();
        let first = sim
            .submit_receipt(&device, &sim_receipt("INV-001"))
            .await
            .unwrap();
        let second = sim
            .submit_receipt(&device, &sim_receipt("INV-002"))
            .await
            .unwrap();
        assert_eq!(first.receipt_global_number, 1);
        assert_eq!(second.receipt_global_number, 2);
        assert_eq!(second.receipt_number, 2);

        let closed = sim.close_day(&device).await.unwrap();
        assert_eq!(closed.last_receipt_global_number, 2);

        let reopened = sim.open_day(&device).await.unwrap();
        assert_eq!(reopened.fiscal_day_no, 2);
        let third = sim
            .submit_receipt(&device, &sim_receipt("INV-003"))
            .await
            .unwrap();
        // Global numbering continues across days, the in-day number resets.
        assert_eq!(third.receipt_global_number, 3);
        assert_eq!(third.receipt_number, 1);
    }

    #[tokio::test]
    async fn confirmation_carries_verification_material() {
        let sim = SimulatedDevice::new();
        let device = sim_device();
        sim.open_day(&device).await.unwrap();

        let confirmation = sim
            .submit_receipt(&device, &sim_receipt("INV-001"))
            .await
            .unwrap();
        assert_eq!(confirmation.device_serial, "SIM-0001");
        assert!(confirmation.qr_url.contains("SIM-0001"));
        assert_eq!(confirmation.verification_code.len(), 16);
        assert_eq!(
            confirmation.verification_code,
            verification_code("SIM-0001", 1, "INV-001")
        );
    }

    #[tokio::test]
    async fn double_open_is_an_operation_state_fault() {
        let sim = SimulatedDevice::new();
        let device = sim_device();
        sim.open_day(&device).await.unwrap();

        let fault = sim.open_day(&device).await.unwrap_err();
        assert_eq!(fault.code, "INVALID_OPERATION_STATE");
    }
}
