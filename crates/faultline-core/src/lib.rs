//! Core domain model for the Faultline issue pipeline.
//!
//! This crate holds the types shared between the reporting side and the
//! consuming side of the pipeline:
//!
//! - **Events and entities**: [`IssueEvent`] (the immutable wire message),
//!   [`Issue`] (the persisted entity) and its append-only sub-collections
//!   ([`Comment`], [`Activity`])
//! - **Fingerprinting**: [`Fingerprinter`] groups occurrences of the same
//!   underlying error by normalising variable data (ids, timestamps,
//!   addresses) and hashing the remainder
//!
//! Everything here is pure data and pure functions; backends and I/O live in
//! the `faultline-broker` and `faultline-ingest` crates.

mod fingerprint;
mod normalise;
mod types;

pub use fingerprint::{compute_fingerprint, Fingerprinter, FingerprintConfig};
pub use normalise::{normalise_message, normalise_stack_location};
pub use types::{
    Activity, ActivityKind, Comment, ErrorReport, FieldChange, Issue, IssueEvent, IssueId,
    IssueKind, IssuePriority, IssueStatus, Severity, CONTEXT_ERROR_TYPE, CONTEXT_FINGERPRINT,
};
