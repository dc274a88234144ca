use thiserror::Error;

use fiskus_store::StoreError;
use fiskus_types::{CompanyId, DeviceFault, DeviceId};

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors raised by the device registry and day scheduling.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    NotFound(DeviceId),

    #[error("no fiscal device registered for company {0}")]
    NoDeviceForCompany(CompanyId),

    #[error("device {device} already has an open fiscal day")]
    DayAlreadyOpen { device: DeviceId },

    #[error("device {device} has no open fiscal day")]
    DayNotOpen { device: DeviceId },

    #[error("device link fault: {0}")]
    Link(#[from] DeviceFault),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
