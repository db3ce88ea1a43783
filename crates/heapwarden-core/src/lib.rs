//! Safe logic shared by the heapwarden interception layer: the
//! Allocation Registry, the Provenance Classifier, and pure report
//! formatting. No FFI, no `unsafe` (enforced by `#![deny(unsafe_code)]`
//! in this crate's `Cargo.toml`), fully testable without a preloaded
//! process.

pub mod fmtbuf;
pub mod provenance;
pub mod record;
pub mod registry;
pub mod report;

pub use provenance::classify;
pub use record::{AllocationRecord, Provenance, MAX_FRAMES};
pub use registry::{AllocationRegistry, DrainSummary};
