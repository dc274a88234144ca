//! Fiscalisation gate for accounting documents.
//!
//! The gate sits between the document form and the fiscal device and
//! holds the overlay to a small set of rules:
//!
//! - The fiscalise action is offered exactly when a document is posted
//!   and not yet fiscalised, re-evaluated from the stored record on
//!   every render.
//! - Fiscalisation happens at most once per document. A second
//!   invocation is refused before anything reaches the device.
//! - The fiscalised flag and the receipt block change together in one
//!   write. A failed submission changes nothing and stays retryable.
//! - Every refusal, failure and committed receipt lands in the
//!   hash-linked journal.
//!
//! [`surface`] is the pure read-model for the form, [`receipt`] turns
//! a document into the submission contract, and [`service`] wires both
//! to storage and the device link.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]
#![cfg_attr(feature = "strict-docs", deny(missing_docs))]

pub mod error;
pub mod receipt;
pub mod service;
pub mod surface;

pub use error::{AssemblyError, GateError, GateRefusal, GateResult};
pub use receipt::assemble_receipt;
pub use service::{FiscalGate, FiscaliseCommand, FiscalisationOutcome};
pub use surface::{
    fiscal_integrity_breach, fiscal_panel_visible, fiscal_status, fiscalise_action_visible,
    surface_view, FiscalStatus, SurfaceView,
};
