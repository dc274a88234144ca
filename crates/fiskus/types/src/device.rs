use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{CompanyId, DeviceId};

/// Fault code a device reports for an invoice number it already registered.
pub const FAULT_DUPLICATE_RECEIPT: &str = "RCPT013";
/// Fault code for submissions against a closed fiscal day.
pub const FAULT_DAY_NOT_OPEN: &str = "INVALID_OPERATION_STATE";

/// Fiscal day lifecycle as reported by the authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiscalDayStatus {
    Opened,
    Closed,
}

impl FiscalDayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FiscalDayStatus::Opened => "FISCALDAYOPENED",
            FiscalDayStatus::Closed => "FISCALDAYCLOSED",
        }
    }
}

/// Short-lived credentials for one registered device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Fault reported by a device link operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("device fault {code}: {message}")]
pub struct DeviceFault {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl DeviceFault {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// A registered fiscal device and its last known authority-side state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FiscalDevice {
    pub id: DeviceId,
    pub company_id: CompanyId,
    pub label: String,
    /// Authority-assigned device number, unique per company.
    pub device_no: i64,
    pub serial: String,
    pub activation_key: String,
    pub day_status: FiscalDayStatus,
    pub fiscal_day_no: Option<i64>,
    pub last_receipt_global_number: i64,
    pub last_receipt_number: i64,
    #[serde(default)]
    pub fiscal_day_counters: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fault: Option<DeviceFault>,
    pub registered_at: DateTime<Utc>,
}

impl FiscalDevice {
    pub fn is_day_open(&self) -> bool {
        self.day_status == FiscalDayStatus::Opened
    }

    /// True when the device has no usable session token.
    pub fn session_expired(&self, now: DateTime<Utc>) -> bool {
        match &self.session {
            Some(token) => token.is_expired(now),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn day_status_canonical_strings() {
        assert_eq!(FiscalDayStatus::Opened.as_str(), "FISCALDAYOPENED");
        assert_eq!(FiscalDayStatus::Closed.as_str(), "FISCALDAYCLOSED");
    }

    #[test]
    fn session_expiry_boundary() {
        let now = Utc::now();
        let token = SessionToken {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at: now,
        };
        assert!(token.is_expired(now));
        assert!(!token.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn missing_session_counts_as_expired() {
        let device = FiscalDevice {
            id: DeviceId::new(),
            company_id: CompanyId::new(),
            label: "Till 1".to_string(),
            device_no: 1001,
            serial: "DEV-01".to_string(),
            activation_key: "0000-0000".to_string(),
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
        assert!(device.session_expired(Utc::now()));
        assert!(!device.is_day_open());
    }
}
