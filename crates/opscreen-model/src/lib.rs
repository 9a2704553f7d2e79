#![forbid(unsafe_code)]
//! Screening domain model SSOT.
//!
//! Every enumeration that crosses a wire or a table lives here, together
//! with the entity-key derivation that the dispatcher, worker, and refresh
//! coordinator all agree on.

mod decision;
mod entity;
mod report;

pub use decision::{
    CheckReason, Confidence, ReviewOutcome, ReviewState, RiskLevel, ScreeningStatus, Transition,
};
pub use entity::{
    derive_entity_key, normalize_dob, normalize_name, Dob, EntityKey, EntityKind, ValidationError,
    ENTITY_KEY_HEX_LEN,
};
pub use report::{CheckSummary, ScreeningReport, TopMatch, CHECK_SUMMARY_DATE_FORMAT};

pub const CRATE_NAME: &str = "opscreen-model";

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
