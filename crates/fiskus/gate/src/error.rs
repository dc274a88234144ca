use std::fmt;

use thiserror::Error;

use fiskus_store::StoreError;
use fiskus_types::{CompanyId, DeviceFault, DeviceId, DocumentId, DocumentState};

/// Result type for gate operations.
pub type GateResult<T> = Result<T, GateError>;

/// Why the gate refused to start a submission.
///
/// A refusal is decided before anything is sent to a device and never
/// mutates the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateRefusal {
    /// The document already carries a fiscal receipt.
    AlreadyFiscalised,
    /// Only posted documents can be fiscalised.
    NotPosted { state: DocumentState },
}

impl fmt::Display for GateRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRefusal::AlreadyFiscalised => write!(f, "document is already fiscalised"),
            GateRefusal::NotPosted { state } => {
                write!(f, "document is {state:?}, only posted documents qualify")
            }
        }
    }
}

/// Errors raised while assembling a receipt from a document.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("line {line:?} has no HS code")]
    MissingHsCode { line: String },

    #[error("document mixes tax-inclusive and tax-exclusive lines")]
    MixedTaxInclusion,

    #[error("document has no fiscalisable lines")]
    EmptyReceipt,
}

/// Errors raised by the fiscalisation gate.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("fiscalisation refused for {document}: {reason}")]
    Refused {
        document: DocumentId,
        reason: GateRefusal,
    },

    #[error("no fiscal device available for company {0}")]
    DeviceUnavailable(CompanyId),

    #[error("fiscal day is not open on device {0}")]
    DayClosed(DeviceId),

    #[error("receipt assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("device {device} rejected the submission: {fault}")]
    Link {
        device: DeviceId,
        fault: DeviceFault,
    },

    #[error("document {document} is fiscally inconsistent: {detail}")]
    Inconsistent {
        document: DocumentId,
        detail: String,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
