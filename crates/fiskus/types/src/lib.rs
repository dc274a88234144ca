//! Core type definitions for the fiskus fiscal overlay.
//!
//! This crate provides the shared vocabulary: typed IDs, the document and
//! device models, and the receipt contracts exchanged with a fiscal device.
#![deny(unsafe_code)]

pub mod device;
pub mod document;
pub mod ids;
pub mod receipt;

// Re-export primary types at crate root for ergonomic use.
pub use device::{
    DeviceFault, FiscalDayStatus, FiscalDevice, SessionToken, FAULT_DAY_NOT_OPEN,
    FAULT_DUPLICATE_RECEIPT,
};
pub use document::{
    Counterparty, Document, DocumentKind, DocumentLine, DocumentState, FiscalFields, LineTax,
    PostalAddress,
};
pub use ids::{CompanyId, DeviceId, DocumentId};
pub use receipt::{
    BuyerData, DayClosed, DayOpened, DeviceStatusReport, FiscalConfirmation, FiscalReceipt,
    PaymentMethod, ReceiptKind, ReceiptLine, ReceiptLineKind, ReceiptPayment,
};
