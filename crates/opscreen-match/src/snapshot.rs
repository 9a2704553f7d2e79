// SPDX-License-Identifier: Apache-2.0

use opscreen_model::{normalize_dob, normalize_name, sha256_hex, Dob, EntityKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub const CLEARED_SOURCE_LABEL: &str = "Open Sanctions";
pub const PEP_SOURCE_LABEL: &str = "Consolidated PEP list";

const MAX_SNAPSHOT_LINE_BYTES: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotError(pub String);

impl Display for SnapshotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SnapshotError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Sanctions,
    Peps,
}

/// One watchlist subject as materialized by the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistRow {
    pub id: String,
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub topics: Option<String>,
    #[serde(default)]
    pub regime: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    pub source_type: SourceKind,
}

impl WatchlistRow {
    #[must_use]
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self.schema.trim().to_ascii_lowercase().as_str() {
            "person" => Some(EntityKind::Person),
            "organization" | "company" | "legalentity" => Some(EntityKind::Organization),
            _ => None,
        }
    }

    /// Canonical issuing-authority label from the display allow-list, or
    /// `None` when the row's regime is outside it.
    #[must_use]
    pub fn canonical_regime(&self) -> Option<&'static str> {
        if self.source_type == SourceKind::Peps {
            return None;
        }
        let haystack = format!(
            "{} {}",
            self.regime.as_deref().unwrap_or_default(),
            self.dataset.as_deref().unwrap_or_default()
        )
        .to_ascii_lowercase();
        const UK: [&str; 6] = [
            "hmt",
            "ofsi",
            "hm treasury",
            "uk financial sanctions",
            "uk sanctions",
            "gb-hmt",
        ];
        if UK.iter().any(|n| haystack.contains(n)) {
            return Some("HM Treasury");
        }
        if haystack.contains("ofac") {
            return Some("OFAC");
        }
        const UN: [&str; 4] = ["un-", "unsc", "un security council", "un consolidated"];
        if UN.iter().any(|n| haystack.contains(n)) {
            return Some("UN");
        }
        const EU: [&str; 4] = ["eu-", "eu council", "eu financial sanctions", "eu fsf"];
        if EU.iter().any(|n| haystack.contains(n)) {
            return Some("EU Council");
        }
        None
    }

    #[must_use]
    pub fn uk_scoped(&self) -> bool {
        self.canonical_regime() == Some("HM Treasury")
    }

    /// Content hash used for change detection between snapshots.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let payload = format!(
            "{}|{}|{}|{}|{}",
            self.id,
            normalize_name(&self.name),
            self.birth_date.as_deref().unwrap_or_default(),
            self.regime.as_deref().unwrap_or_default(),
            self.dataset.as_deref().unwrap_or_default()
        );
        sha256_hex(payload.as_bytes())
    }
}

/// A candidate row with its normalization precomputed at load time.
#[derive(Debug, Clone)]
pub(crate) struct IndexedRow {
    pub row: WatchlistRow,
    pub kind: Option<EntityKind>,
    pub normalized_name: String,
    pub normalized_aliases: Vec<String>,
    pub dob: Option<Dob>,
}

/// Immutable in-memory watchlist snapshot.
#[derive(Debug)]
pub struct WatchlistSnapshot {
    rows: Vec<IndexedRow>,
    includes_peps: bool,
}

impl WatchlistSnapshot {
    #[must_use]
    pub fn from_rows(rows: Vec<WatchlistRow>) -> Self {
        let includes_peps = rows.iter().any(|r| r.source_type == SourceKind::Peps);
        let rows = rows
            .into_iter()
            .map(|row| IndexedRow {
                kind: row.entity_kind(),
                normalized_name: normalize_name(&row.name),
                normalized_aliases: row
                    .aliases
                    .iter()
                    .map(|a| normalize_name(a))
                    .filter(|a| !a.is_empty())
                    .collect(),
                dob: row.birth_date.as_deref().and_then(normalize_dob),
                row,
            })
            .collect();
        Self {
            rows,
            includes_peps,
        }
    }

    /// Load a JSON-lines snapshot file; one watchlist row per line.
    pub fn load(path: &Path, include_peps: bool) -> Result<Self, SnapshotError> {
        let file = fs::File::open(path)
            .map_err(|e| SnapshotError(format!("open snapshot {}: {e}", path.display())))?;
        let reader = BufReader::new(file);
        let mut rows = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| SnapshotError(format!("read snapshot line: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            if line.len() > MAX_SNAPSHOT_LINE_BYTES {
                return Err(SnapshotError(format!(
                    "snapshot line {} exceeds max byte length {MAX_SNAPSHOT_LINE_BYTES}",
                    idx + 1
                )));
            }
            let row: WatchlistRow = serde_json::from_str(&line).map_err(|e| {
                SnapshotError(format!("invalid snapshot row at line {}: {e}", idx + 1))
            })?;
            if !include_peps && row.source_type == SourceKind::Peps {
                continue;
            }
            rows.push(row);
        }
        if rows.is_empty() {
            return Err(SnapshotError(format!(
                "snapshot {} holds no rows",
                path.display()
            )));
        }
        Ok(Self::from_rows(rows))
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn includes_peps(&self) -> bool {
        self.includes_peps
    }

    pub(crate) fn indexed_rows(&self) -> &[IndexedRow] {
        &self.rows
    }

    pub fn rows(&self) -> impl Iterator<Item = &WatchlistRow> {
        self.rows.iter().map(|r| &r.row)
    }

    /// UK-regime row identities mapped to their content hashes, in stable
    /// order. This is the state the refresh coordinator diffs against.
    #[must_use]
    pub fn uk_state(&self) -> BTreeMap<String, String> {
        self.rows
            .iter()
            .filter(|r| r.row.uk_scoped())
            .map(|r| (r.row.id.clone(), r.row.content_hash()))
            .collect()
    }

    /// Deterministic fingerprint of the sorted UK-regime row identities.
    #[must_use]
    pub fn uk_hash(&self) -> String {
        let mut payload = String::new();
        for (id, hash) in self.uk_state() {
            payload.push_str(&id);
            payload.push(':');
            payload.push_str(&hash);
            payload.push('\n');
        }
        sha256_hex(payload.as_bytes())
    }

    /// Normalized names of UK rows added since a prior state, for the
    /// refresh coordinator's prefix-overlap candidate heuristic.
    #[must_use]
    pub fn uk_names_for_ids(&self, ids: &[String]) -> Vec<String> {
        self.rows
            .iter()
            .filter(|r| ids.iter().any(|id| id == &r.row.id))
            .map(|r| r.normalized_name.clone())
            .filter(|n| !n.is_empty())
            .collect()
    }
}
