use async_trait::async_trait;

use fiskus_types::{
    DayClosed, DayOpened, DeviceFault, DeviceStatusReport, FiscalConfirmation, FiscalDevice,
    FiscalReceipt, SessionToken,
};

/// Boundary to a fiscal device backend.
///
/// Implementations own the transport entirely. The contract is data in,
/// data out: every call either returns a complete response or a
/// [`DeviceFault`], never a partial result. Callers persist nothing on
/// a fault except the fault itself.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Short transport label for logs.
    fn transport(&self) -> &'static str;

    /// Obtain fresh session credentials for a device.
    async fn issue_session(&self, device: &FiscalDevice) -> Result<SessionToken, DeviceFault>;

    /// Open the fiscal day on the device.
    async fn open_day(&self, device: &FiscalDevice) -> Result<DayOpened, DeviceFault>;

    /// Close the fiscal day on the device.
    async fn close_day(&self, device: &FiscalDevice) -> Result<DayClosed, DeviceFault>;

    /// Probe the device-side state without changing it.
    async fn probe_status(&self, device: &FiscalDevice) -> Result<DeviceStatusReport, DeviceFault>;

    /// Register one receipt with the device.
    async fn submit_receipt(
        &self,
        device: &FiscalDevice,
        receipt: &FiscalReceipt,
    ) -> Result<FiscalConfirmation, DeviceFault>;
}
