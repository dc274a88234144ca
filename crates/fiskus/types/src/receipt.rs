use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::FiscalDayStatus;
use crate::document::{DocumentKind, PostalAddress};

/// Receipt classification submitted to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptKind {
    FiscalInvoice,
    CreditNote,
    DebitNote,
}

impl From<DocumentKind> for ReceiptKind {
    fn from(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Invoice => ReceiptKind::FiscalInvoice,
            DocumentKind::CreditNote => ReceiptKind::CreditNote,
            DocumentKind::DebitNote => ReceiptKind::DebitNote,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptLineKind {
    Sale,
    Discount,
}

/// One priced position of a receipt. Discount lines carry negative amounts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub kind: ReceiptLineKind,
    /// 1-based position, counted across sale and discount lines.
    pub number: u32,
    pub hs_code: String,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    pub total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_percent: Option<Decimal>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiptPayment {
    pub method: PaymentMethod,
    pub amount: Decimal,
}

/// Registered buyer identification. Only attached when the counterparty
/// carries both a VAT number and a TIN.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerData {
    pub register_name: String,
    pub trade_name: String,
    pub vat_number: String,
    pub tin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<PostalAddress>,
}

/// Outbound submission contract. Carries everything a device needs to
/// register one document; how it travels is the link's concern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FiscalReceipt {
    pub kind: ReceiptKind,
    pub currency: String,
    pub invoice_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer: Option<BuyerData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Number of the document reversed by a credit or debit note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_debit_reference: Option<String>,
    pub lines_tax_inclusive: bool,
    pub lines: Vec<ReceiptLine>,
    pub payments: Vec<ReceiptPayment>,
    pub total: Decimal,
}

/// Inbound confirmation contract. Every field is required; a submission
/// either yields all of them or a fault.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FiscalConfirmation {
    pub device_serial: String,
    pub qr_url: String,
    pub fiscal_date: DateTime<Utc>,
    pub receipt_global_number: i64,
    pub receipt_number: i64,
    pub fiscal_day_no: i64,
    pub verification_code: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DayOpened {
    pub fiscal_day_no: i64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DayClosed {
    pub fiscal_day_no: i64,
    pub last_receipt_global_number: i64,
    pub closed_at: DateTime<Utc>,
}

/// Snapshot of device-side state returned by a status probe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatusReport {
    pub day_status: FiscalDayStatus,
    pub fiscal_day_no: Option<i64>,
    pub last_receipt_global_number: i64,
    pub last_receipt_number: i64,
    #[serde(default)]
    pub day_counters: Value,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_kind_follows_document_kind() {
        assert_eq!(
            ReceiptKind::from(DocumentKind::Invoice),
            ReceiptKind::FiscalInvoice
        );
        assert_eq!(
            ReceiptKind::from(DocumentKind::CreditNote),
            ReceiptKind::CreditNote
        );
        assert_eq!(
            ReceiptKind::from(DocumentKind::DebitNote),
            ReceiptKind::DebitNote
        );
    }

    #[test]
    fn confirmation_serialization() {
        let confirmation = FiscalConfirmation {
            device_serial: "DEV-01".to_string(),
            qr_url: "https://verify.example/DEV-01/0000000001".to_string(),
            fiscal_date: Utc::now(),
            receipt_global_number: 1,
            receipt_number: 1,
            fiscal_day_no: 1,
            verification_code: "00FF00FF".to_string(),
        };
        let json = serde_json::to_string(&confirmation).unwrap();
        let restored: FiscalConfirmation = serde_json::from_str(&json).unwrap();
        assert_eq!(confirmation, restored);
    }
}
