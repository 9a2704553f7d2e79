#![forbid(unsafe_code)]
//! Matcher collaborator: a watchlist snapshot plus the decision rule engine.
//!
//! Free of I/O side effects once a snapshot is loaded; the same snapshot and
//! input always produce the same decision.

mod engine;
mod similarity;
mod snapshot;

pub use engine::{run_screening, MatchOutcome, MatchSettings, ScreenInput};
pub use similarity::token_set_ratio;
pub use snapshot::{
    SnapshotError, SourceKind, WatchlistRow, WatchlistSnapshot, CLEARED_SOURCE_LABEL,
    PEP_SOURCE_LABEL,
};

pub const CRATE_NAME: &str = "opscreen-match";
