//! Unified storage abstractions for the fiskus overlay.
//!
//! This crate defines the storage contract the fiscal surfaces run on:
//! - accounting documents with their fiscal result block (system of record)
//! - registered fiscal devices and their last known authority-side state
//! - an append-only, hash-chained fiscal journal
//!
//! Design stance:
//! - Postgres remains the transactional source of truth.
//! - The fiscalised flag and the fiscal result block only ever change
//!   together, through `commit_fiscalisation`.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod model;
mod traits;

pub use error::{StoreError, StoreResult};
pub use model::{
    verify_journal, JournalAppend, JournalFilter, JournalRecord, JournalStage,
};
pub use traits::{DeviceStore, DocumentStore, FiskusStore, JournalStore, QueryWindow};
