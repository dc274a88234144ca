//! Mock device link for testing.
//!
//! Returns deterministic confirmations or a configured fault without
//! any device state. Tests that need day and duplicate semantics use
//! [`crate::simulator::SimulatedDevice`] instead.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;

use fiskus_types::{
    DayClosed, DayOpened, DeviceFault, DeviceStatusReport, FiscalConfirmation, FiscalDevice,
    FiscalReceipt, SessionToken,
};

use crate::link::DeviceLink;

/// Mock [`DeviceLink`] with scripted behaviour.
pub struct MockDeviceLink {
    fault: Option<DeviceFault>,
    next_global: AtomicI64,
    submissions: AtomicUsize,
}

impl MockDeviceLink {
    /// Create a link that confirms every operation.
    pub fn confirm_all() -> Self {
        Self {
            fault: None,
            next_global: AtomicI64::new(1),
            submissions: AtomicUsize::new(0),
        }
    }

    /// Create a link that fails every operation with the given fault.
    pub fn with_fault(fault: DeviceFault) -> Self {
        Self {
            fault: Some(fault),
            next_global: AtomicI64::new(1),
            submissions: AtomicUsize::new(0),
        }
    }

    /// Create a link that fails every operation with a connection fault.
    pub fn fail_all() -> Self {
        Self::with_fault(DeviceFault::new("CONNECTION_REFUSED", "connection refused"))
    }

    /// Pin the next receipt global number.
    pub fn with_next_global(self, value: i64) -> Self {
        self.next_global.store(value, Ordering::SeqCst);
        self
    }

    /// Number of receipt submissions attempted against this link.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn check_fault(&self) -> Result<(), DeviceFault> {
        match &self.fault {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DeviceLink for MockDeviceLink {
    fn transport(&self) -> &'static str {
        "mock"
    }

    async fn issue_session(&self, _device: &FiscalDevice) -> Result<SessionToken, DeviceFault> {
        self.check_fault()?;
        Ok(SessionToken {
            access_token: uuid::Uuid::new_v4().to_string(),
            refresh_token: uuid::Uuid::new_v4().to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    async fn open_day(&self, device: &FiscalDevice) -> Result<DayOpened, DeviceFault> {
        self.check_fault()?;
        Ok(DayOpened {
            fiscal_day_no: device.fiscal_day_no.unwrap_or(0) + 1,
            opened_at: Utc::now(),
        })
    }

    async fn close_day(&self, device: &FiscalDevice) -> Result<DayClosed, DeviceFault> {
        self.check_fault()?;
        Ok(DayClosed {
            fiscal_day_no: device.fiscal_day_no.unwrap_or(1),
            last_receipt_global_number: device.last_receipt_global_number,
            closed_at: Utc::now(),
        })
    }

    async fn probe_status(&self, device: &FiscalDevice) -> Result<DeviceStatusReport, DeviceFault> {
        self.check_fault()?;
        Ok(DeviceStatusReport {
            day_status: device.day_status,
            fiscal_day_no: device.fiscal_day_no,
            last_receipt_global_number: device.last_receipt_global_number,
            last_receipt_number: device.last_receipt_number,
            day_counters: json!([]),
            checked_at: Utc::now(),
        })
    }

    async fn submit_receipt(
        &self,
        device: &FiscalDevice,
        _receipt: &FiscalReceipt,
    ) -> Result<FiscalConfirmation, DeviceFault> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.check_fault()?;
        let global = self.next_global.fetch_add(1, Ordering::SeqCst);
        Ok(FiscalConfirmation {
            device_serial: device.serial.clone(),
            qr_url: format!("https://verify.example/{}/{:010}", device.serial, global),
            fiscal_date: Utc::now(),
            receipt_global_number: global,
            receipt_number: global,
            fiscal_day_no: device.fiscal_day_no.unwrap_or(1),
            verification_code: format!("{global:08X}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fiskus_types::{CompanyId, DeviceId, FiscalDayStatus, PaymentMethod, ReceiptKind, ReceiptPayment};
    use rust_decimal_macros::dec;

    fn mock_device() -> FiscalDevice {
        FiscalDevice {
            id: DeviceId::new(),
            company_id: CompanyId::new(),
            label: "Till 1".to_string(),
            device_no: 1,
            serial: "DEV-01".to_string(),
            activation_key: "0000-1111".to_string(),
            day_status: FiscalDayStatus::Opened,
            fiscal_day_no: Some(3),
            last_receipt_global_number: 10,
            last_receipt_number: 4,
            fiscal_day_counters: serde_json::Value::Null,
            session: None,
            last_operation: None,
            last_status_check: None,
            last_fault: None,
            registered_at: Utc::now(),
        }
    }

    fn mock_receipt() -> FiscalReceipt {
        FiscalReceipt {
            kind: ReceiptKind::FiscalInvoice,
            currency: "USD".to_string(),
            invoice_number: "INV-001".to_string(),
            buyer: None,
            notes: None,
            credit_debit_reference: None,
            lines_tax_inclusive: true,
            lines: Vec::new(),
            payments: vec![ReceiptPayment {
                method: PaymentMethod::Cash,
                amount: dec!(10.00),
            }],
            total: dec!(10.00),
        }
    }

    #[tokio::test]
    async fn confirm_all_numbers_sequentially() {
        let link = MockDeviceLink::confirm_all();
        let device = mock_device();

        let first = link.submit_receipt(&device, &mock_receipt()).await.unwrap();
        let second = link.submit_receipt(&device, &mock_receipt()).await.unwrap();
        assert_eq!(first.receipt_global_number, 1);
        assert_eq!(second.receipt_global_number, 2);
        assert_eq!(first.device_serial, "DEV-01");
        assert_eq!(link.submissions(), 2);
    }

    #[tokio::test]
    async fn with_next_global_pins_numbering() {
        let link = MockDeviceLink::confirm_all().with_next_global(42);
        let device = mock_device();

        let confirmation = link.submit_receipt(&device, &mock_receipt()).await.unwrap();
        assert_eq!(confirmation.receipt_global_number, 42);
    }

    #[tokio::test]
    async fn with_fault_fails_every_call() {
        let link = MockDeviceLink::with_fault(DeviceFault::new("TIMEOUT", "device timed out"));
        let device = mock_device();

        assert!(link.issue_session(&device).await.is_err());
        assert!(link.open_day(&device).await.is_err());
        let fault = link
            .submit_receipt(&device, &mock_receipt())
            .await
            .unwrap_err();
        assert_eq!(fault.code, "TIMEOUT");
        // Failed submissions still count as attempts.
        assert_eq!(link.submissions(), 1);
    }
}
