//! Registry for fiscal devices and their day lifecycle.
//!
//! The registry is the single mutator of device records. Every link
//! call goes through it so that session state, day state and the last
//! observed fault always land back in the store.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};

use fiskus_store::{
    DeviceStore, JournalAppend, JournalStage, JournalStore, QueryWindow, StoreResult,
};
use fiskus_types::{
    CompanyId, DayClosed, DayOpened, DeviceFault, DeviceId, DeviceStatusReport, FiscalDayStatus,
    FiscalDevice,
};

use crate::error::{DeviceError, DeviceResult};
use crate::link::DeviceLink;

/// Parameters for registering a new fiscal device.
#[derive(Clone, Debug)]
pub struct NewDevice {
    pub company_id: CompanyId,
    pub label: String,
    /// Authority-assigned device number, unique per company.
    pub device_no: i64,
    pub serial: String,
    pub activation_key: String,
}

/// Persist a link fault onto the device record.
///
/// Shared by the registry and the fiscalisation gate so that a failed
/// call is always visible on the device afterwards.
pub async fn record_device_fault(
    devices: &dyn DeviceStore,
    device: &FiscalDevice,
    fault: &DeviceFault,
) -> StoreResult<()> {
    let mut updated = device.clone();
    updated.last_fault = Some(fault.clone());
    updated.last_status_check = Some(Utc::now());
    devices.update_device(updated).await
}

/// Manages fiscal devices: registration, sessions and the fiscal day.
pub struct DeviceRegistry {
    devices: Arc<dyn DeviceStore>,
    journal: Arc<dyn JournalStore>,
    link: Arc<dyn DeviceLink>,
}

impl DeviceRegistry {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        journal: Arc<dyn JournalStore>,
        link: Arc<dyn DeviceLink>,
    ) -> Self {
        Self {
            devices,
            journal,
            link,
        }
    }

    /// Register a new device. The device starts with a closed fiscal
    /// day and no session.
    pub async fn register(&self, new: NewDevice) -> DeviceResult<FiscalDevice> {
        let device = FiscalDevice {
            id: DeviceId::new(),
            company_id: new.company_id,
            label: new.label,
            device_no: new.device_no,
            serial: new.serial,
            activation_key: new.activation_key,
            day_status: FiscalDayStatus::Closed,
            fiscal_day_no: None,
            last_receipt_global_number: 0,
            last_receipt_number: 0,
            fiscal_day_counters: Value::Null,
            session: None,
            last_operation: None,
            last_status_check: None,
            last_fault: None,
            registered_at: Utc::now(),
        };
        self.devices.register_device(device.clone()).await?;
        info!(
            device = %device.id,
            serial = %device.serial,
            transport = self.link.transport(),
            "fiscal device registered"
        );
        self.journal_event(
            JournalStage::DeviceRegistered,
            true,
            format!("device {} registered", device.serial),
            Some(device.id.clone()),
            json!({ "device_no": device.device_no }),
        )
        .await?;
        Ok(device)
    }

    /// Fetch a device by id.
    pub async fn device(&self, device_id: &DeviceId) -> DeviceResult<FiscalDevice> {
        self.devices
            .device(device_id)
            .await?
            .ok_or_else(|| DeviceError::NotFound(device_id.clone()))
    }

    /// Fetch the device serving a company.
    pub async fn device_for_company(&self, company_id: &CompanyId) -> DeviceResult<FiscalDevice> {
        self.devices
            .device_for_company(company_id)
            .await?
            .ok_or_else(|| DeviceError::NoDeviceForCompany(company_id.clone()))
    }

    /// List all registered devices.
    pub async fn list(&self) -> DeviceResult<Vec<FiscalDevice>> {
        Ok(self.devices.list_devices(QueryWindow::default()).await?)
    }

    /// Return the device with valid session credentials, renewing them
    /// through the link when the current ones are missing or expired.
    pub async fn ensure_session(&self, device_id: &DeviceId) -> DeviceResult<FiscalDevice> {
        let device = self.device(device_id).await?;
        if !device.session_expired(Utc::now()) {
            return Ok(device);
        }
        debug!(device = %device.id, "renewing device session");
        match self.link.issue_session(&device).await {
            Err(fault) => {
                record_device_fault(self.devices.as_ref(), &device, &fault).await?;
                self.journal_event(
                    JournalStage::SessionRenewed,
                    false,
                    fault.to_string(),
                    Some(device.id.clone()),
                    json!({ "code": fault.code }),
                )
                .await?;
                Err(DeviceError::Link(fault))
            }
            Ok(token) => {
                let mut updated = device;
                updated.session = Some(token);
                self.devices.update_device(updated.clone()).await?;
                self.journal_event(
                    JournalStage::SessionRenewed,
                    true,
                    "session renewed".to_string(),
                    Some(updated.id.clone()),
                    json!({}),
                )
                .await?;
                Ok(updated)
            }
        }
    }

    /// Open the fiscal day on a device.
    pub async fn open_day(&self, device_id: &DeviceId) -> DeviceResult<DayOpened> {
        let device = self.ensure_session(device_id).await?;
        if device.is_day_open() {
            return Err(DeviceError::DayAlreadyOpen { device: device.id });
        }
        match self.link.open_day(&device).await {
            Err(fault) => {
                record_device_fault(self.devices.as_ref(), &device, &fault).await?;
                self.journal_event(
                    JournalStage::DayOpened,
                    false,
                    fault.to_string(),
                    Some(device.id.clone()),
                    json!({ "code": fault.code }),
                )
                .await?;
                Err(DeviceError::Link(fault))
            }
            Ok(opened) => {
                let mut updated = device;
                updated.day_status = FiscalDayStatus::Opened;
                updated.fiscal_day_no = Some(opened.fiscal_day_no);
                updated.last_operation = Some(opened.opened_at);
                self.devices.update_device(updated.clone()).await?;
                info!(
                    device = %updated.id,
                    fiscal_day_no = opened.fiscal_day_no,
                    "fiscal day opened"
                );
                self.journal_event(
                    JournalStage::DayOpened,
                    true,
                    format!("fiscal day {} opened", opened.fiscal_day_no),
                    Some(updated.id),
                    json!({ "fiscal_day_no": opened.fiscal_day_no }),
                )
                .await?;
                Ok(opened)
            }
        }
    }

    /// Close the fiscal day on a device.
    pub async fn close_day(&self, device_id: &DeviceId) -> DeviceResult<DayClosed> {
        let device = self.ensure_session(device_id).await?;
        if !device.is_day_open() {
            return Err(DeviceError::DayNotOpen { device: device.id });
        }
        match self.link.close_day(&device).await {
            Err(fault) => {
                record_device_fault(self.devices.as_ref(), &device, &fault).await?;
                self.journal_event(
                    JournalStage::DayClosed,
                    false,
                    fault.to_string(),
                    Some(device.id.clone()),
                    json!({ "code": fault.code }),
                )
                .await?;
                Err(DeviceError::Link(fault))
            }
            Ok(closed) => {
                let mut updated = device;
                updated.day_status = FiscalDayStatus::Closed;
                updated.fiscal_day_no = Some(closed.fiscal_day_no);
                updated.last_receipt_global_number = closed.last_receipt_global_number;
                updated.last_operation = Some(closed.closed_at);
                self.devices.update_device(updated.clone()).await?;
                info!(
                    device = %updated.id,
                    fiscal_day_no = closed.fiscal_day_no,
                    "fiscal day closed"
                );
                self.journal_event(
                    JournalStage::DayClosed,
                    true,
                    format!("fiscal day {} closed", closed.fiscal_day_no),
                    Some(updated.id),
                    json!({
                        "fiscal_day_no": closed.fiscal_day_no,
                        "last_receipt_global_number": closed.last_receipt_global_number,
                    }),
                )
                .await?;
                Ok(closed)
            }
        }
    }

    /// Probe the device and mirror the reported state into the store.
    pub async fn check_status(&self, device_id: &DeviceId) -> DeviceResult<DeviceStatusReport> {
        let device = self.ensure_session(device_id).await?;
        match self.link.probe_status(&device).await {
            Err(fault) => {
                record_device_fault(self.devices.as_ref(), &device, &fault).await?;
                self.journal_event(
                    JournalStage::StatusChecked,
                    false,
                    fault.to_string(),
                    Some(device.id.clone()),
                    json!({ "code": fault.code }),
                )
                .await?;
                Err(DeviceError::Link(fault))
            }
            Ok(report) => {
                let mut updated = device;
                updated.day_status = report.day_status;
                updated.fiscal_day_no = report.fiscal_day_no;
                updated.last_receipt_global_number = report.last_receipt_global_number;
                updated.last_receipt_number = report.last_receipt_number;
                updated.fiscal_day_counters = report.day_counters.clone();
                updated.last_status_check = Some(report.checked_at);
                self.devices.update_device(updated.clone()).await?;
                debug!(
                    device = %updated.id,
                    status = report.day_status.as_str(),
                    "device status refreshed"
                );
                self.journal_event(
                    JournalStage::StatusChecked,
                    true,
                    format!("device status {}", report.day_status.as_str()),
                    Some(updated.id),
                    json!({ "fiscal_day_no": report.fiscal_day_no }),
                )
                .await?;
                Ok(report)
            }
        }
    }

    async fn journal_event(
        &self,
        stage: JournalStage,
        success: bool,
        detail: String,
        device_id: Option<DeviceId>,
        payload: Value,
    ) -> DeviceResult<()> {
        self.journal
            .append_entry(JournalAppend {
                timestamp: Utc::now(),
                stage,
                success,
                detail,
                document_id: None,
                device_id,
                payload,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockDeviceLink;
    use crate::simulator::SimulatedDevice;
    use fiskus_store::{memory::InMemoryFiskusStore, JournalFilter, StoreError};

    fn sample_device(company: &CompanyId, device_no: i64) -> NewDevice {
        NewDevice {
            company_id: company.clone(),
            label: format!("Till {device_no}"),
            device_no,
            serial: format!("SIM-{device_no:04}"),
            activation_key: "0000-1111".to_string(),
        }
    }

    fn setup_registry(link: Arc<dyn DeviceLink>) -> (DeviceRegistry, Arc<InMemoryFiskusStore>) {
        let store = Arc::new(InMemoryFiskusStore::new());
        let registry = DeviceRegistry::new(store.clone(), store.clone(), link);
        (registry, store)
    }

    #[tokio::test]
    async fn registers_and_finds_company_device() {
        let (registry, _store) = setup_registry(Arc::new(MockDeviceLink::confirm_all()));
        let company = CompanyId::new();

        let device = registry
            .register(sample_device(&company, 1))
            .await
            .unwrap();
        assert_eq!(device.day_status, FiscalDayStatus::Closed);
        assert!(device.session.is_none());

        let found = registry.device_for_company(&company).await.unwrap();
        assert_eq!(found.id, device.id);
    }

    #[tokio::test]
    async fn duplicate_device_number_is_a_conflict() {
        let (registry, _store) = setup_registry(Arc::new(MockDeviceLink::confirm_all()));
        let company = CompanyId::new();

        registry
            .register(sample_device(&company, 7))
            .await
            .unwrap();
        let result = registry.register(sample_device(&company, 7)).await;
        assert!(matches!(
            result,
            Err(DeviceError::Store(StoreError::Conflict(_)))
        ));
    }

    #[tokio::test]
    async fn open_day_persists_day_state() {
        let (registry, _store) = setup_registry(Arc::new(SimulatedDevice::new()));
        let company = CompanyId::new();
        let device = registry
            .register(sample_device(&company, 1))
            .await
            .unwrap();

        let opened = registry.open_day(&device.id).await.unwrap();
        assert_eq!(opened.fiscal_day_no, 1);

        let stored = registry.device(&device.id).await.unwrap();
        assert!(stored.is_day_open());
        assert_eq!(stored.fiscal_day_no, Some(1));
        assert!(stored.last_operation.is_some());
        assert!(stored.session.is_some());
    }

    #[tokio::test]
    async fn open_day_refuses_when_already_open() {
        let (registry, _store) = setup_registry(Arc::new(SimulatedDevice::new()));
        let company = CompanyId::new();
        let device = registry
            .register(sample_device(&company, 1))
            .await
            .unwrap();

        registry.open_day(&device.id).await.unwrap();
        let result = registry.open_day(&device.id).await;
        assert!(matches!(result, Err(DeviceError::DayAlreadyOpen { .. })));
    }

    #[tokio::test]
    async fn close_day_requires_an_open_day() {
        let (registry, _store) = setup_registry(Arc::new(SimulatedDevice::new()));
        let company = CompanyId::new();
        let device = registry
            .register(sample_device(&company, 1))
            .await
            .unwrap();

        let result = registry.close_day(&device.id).await;
        assert!(matches!(result, Err(DeviceError::DayNotOpen { .. })));
    }

    #[tokio::test]
    async fn session_renewed_only_when_expired() {
        let (registry, _store) = setup_registry(Arc::new(MockDeviceLink::confirm_all()));
        let company = CompanyId::new();
        let device = registry
            .register(sample_device(&company, 1))
            .await
            .unwrap();

        let first = registry.ensure_session(&device.id).await.unwrap();
        let second = registry.ensure_session(&device.id).await.unwrap();
        let first_token = first.session.unwrap().access_token;
        let second_token = second.session.unwrap().access_token;
        assert_eq!(first_token, second_token);
    }

    #[tokio::test]
    async fn link_fault_is_persisted_on_the_device() {
        let (registry, _store) = setup_registry(Arc::new(MockDeviceLink::fail_all()));
        let company = CompanyId::new();
        let device = registry
            .register(sample_device(&company, 1))
            .await
            .unwrap();

        let result = registry.open_day(&device.id).await;
        assert!(matches!(result, Err(DeviceError::Link(_))));

        let stored = registry.device(&device.id).await.unwrap();
        let fault = stored.last_fault.unwrap();
        assert_eq!(fault.code, "CONNECTION_REFUSED");
        assert!(stored.last_status_check.is_some());
    }

    #[tokio::test]
    async fn check_status_refreshes_device_fields() {
        let (registry, _store) = setup_registry(Arc::new(SimulatedDevice::new()));
        let company = CompanyId::new();
        let device = registry
            .register(sample_device(&company, 1))
            .await
            .unwrap();
        registry.open_day(&device.id).await.unwrap();

        let report = registry.check_status(&device.id).await.unwrap();
        assert_eq!(report.day_status, FiscalDayStatus::Opened);

        let stored = registry.device(&device.id).await.unwrap();
        assert_eq!(stored.day_status, FiscalDayStatus::Opened);
        assert!(stored.last_status_check.is_some());
    }

    #[tokio::test]
    async fn lifecycle_is_journalled() {
        let (registry, store) = setup_registry(Arc::new(SimulatedDevice::new()));
        let company = CompanyId::new();
        let device = registry
            .register(sample_device(&company, 1))
            .await
            .unwrap();
        registry.open_day(&device.id).await.unwrap();
        registry.close_day(&device.id).await.unwrap();

        let registered = store
            .list_entries(
                JournalFilter::for_stage(JournalStage::DeviceRegistered),
                QueryWindow::default(),
            )
            .await
            .unwrap();
        assert_eq!(registered.len(), 1);

        let opened = store
            .list_entries(
                JournalFilter::for_stage(JournalStage::DayOpened),
                QueryWindow::default(),
            )
            .await
            .unwrap();
        assert_eq!(opened.len(), 1);
        assert!(opened[0].success);

        let closed = store
            .list_entries(
                JournalFilter::for_stage(JournalStage::DayClosed),
                QueryWindow::default(),
            )
            .await
            .unwrap();
        assert_eq!(closed.len(), 1);
    }
}
