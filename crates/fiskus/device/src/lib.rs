//! Fiscal device boundary for fiskus.
//!
//! Everything that talks to a fiscal device backend lives behind the
//! [`DeviceLink`] trait. The [`DeviceRegistry`] is the only mutator of
//! device records and journals every lifecycle event, so the stored
//! device always reflects the last exchange with the backend, faults
//! included. [`Daywatch`] keeps fiscal days on the legally required
//! schedule without an operator.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]
#![cfg_attr(feature = "strict-docs", deny(missing_docs))]

pub mod daywatch;
pub mod error;
pub mod link;
pub mod mocks;
pub mod registry;
pub mod simulator;

pub use daywatch::{planned_action, DayAction, Daywatch, DaywatchConfig, SweepReport};
pub use error::{DeviceError, DeviceResult};
pub use link::DeviceLink;
pub use mocks::MockDeviceLink;
pub use registry::{record_device_fault, DeviceRegistry, NewDevice};
pub use simulator::SimulatedDevice;
