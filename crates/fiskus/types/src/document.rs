use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{CompanyId, DeviceId, DocumentId};
use crate::receipt::FiscalConfirmation;

/// Document lifecycle owned by the host accounting system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentState {
    Draft,
    Posted,
    Cancelled,
}

/// Commercial document kind. Decides the receipt kind and the amount sign.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    Invoice,
    CreditNote,
    DebitNote,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub province: String,
    pub city: String,
    pub street: String,
    pub house_no: String,
}

/// Customer identification as carried by the host document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<PostalAddress>,
}

/// Tax attached to a document line. `price_inclusive` must agree across all
/// taxed lines of one document.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineTax {
    pub percent: Decimal,
    pub price_inclusive: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hs_code: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_percent: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax: Option<LineTax>,
}

/// Fiscal registration result block. Written in a single step when a
/// submission succeeds, immutable afterwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FiscalFields {
    pub device_id: Option<DeviceId>,
    pub device_serial: Option<String>,
    pub qr_url: Option<String>,
    pub fiscal_date: Option<DateTime<Utc>>,
    pub receipt_global_number: Option<i64>,
    pub receipt_number: Option<i64>,
    pub fiscal_day_no: Option<i64>,
    pub verification_code: Option<String>,
}

impl FiscalFields {
    /// Builds a fully populated block from a device confirmation.
    pub fn from_confirmation(device_id: DeviceId, confirmation: &FiscalConfirmation) -> Self {
        Self {
            device_id: Some(device_id),
            device_serial: Some(confirmation.device_serial.clone()),
            qr_url: Some(confirmation.qr_url.clone()),
            fiscal_date: Some(confirmation.fiscal_date),
            receipt_global_number: Some(confirmation.receipt_global_number),
            receipt_number: Some(confirmation.receipt_number),
            fiscal_day_no: Some(confirmation.fiscal_day_no),
            verification_code: Some(confirmation.verification_code.clone()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.device_id.is_some()
            && self.device_serial.is_some()
            && self.qr_url.is_some()
            && self.fiscal_date.is_some()
            && self.receipt_global_number.is_some()
            && self.receipt_number.is_some()
            && self.fiscal_day_no.is_some()
            && self.verification_code.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// An accounting document as seen by the fiscal overlay.
///
/// `fiscalised` is never reset once true, and a fiscalised document never
/// leaves `Posted`. Both rules are enforced by storage, not by this type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub company_id: CompanyId,
    pub number: String,
    pub kind: DocumentKind,
    pub state: DocumentState,
    pub currency: String,
    pub counterparty: Counterparty,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reversed_number: Option<String>,
    pub lines: Vec<DocumentLine>,
    pub total: Decimal,
    pub fiscalised: bool,
    #[serde(default)]
    pub fiscal: FiscalFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn customer_vat(&self) -> Option<&str> {
        self.counterparty.vat.as_deref()
    }

    pub fn customer_tin(&self) -> Option<&str> {
        self.counterparty.tin.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DeviceId;

    fn confirmation() -> FiscalConfirmation {
        FiscalConfirmation {
            device_serial: "DEV-01".to_string(),
            qr_url: "https://verify.example/DEV-01/0000000042".to_string(),
            fiscal_date: Utc::now(),
            receipt_global_number: 42,
            receipt_number: 7,
            fiscal_day_no: 3,
            verification_code: "A1B2C3D4".to_string(),
        }
    }

    #[test]
    fn default_block_is_empty_and_incomplete() {
        let fields = FiscalFields::default();
        assert!(fields.is_empty());
        assert!(!fields.is_complete());
    }

    #[test]
    fn confirmation_populates_every_field() {
        let fields = FiscalFields::from_confirmation(DeviceId::new(), &confirmation());
        assert!(fields.is_complete());
        assert!(!fields.is_empty());
        assert_eq!(fields.receipt_global_number, Some(42));
        assert_eq!(fields.device_serial.as_deref(), Some("DEV-01"));
    }

    #[test]
    fn partial_block_is_neither_empty_nor_complete() {
        let fields = FiscalFields {
            qr_url: Some("https://verify.example/x".to_string()),
            ..FiscalFields::default()
        };
        assert!(!fields.is_empty());
        assert!(!fields.is_complete());
    }
}
