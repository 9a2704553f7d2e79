// SPDX-License-Identifier: Apache-2.0

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

pub const ENTITY_KEY_HEX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Person,
    Organization,
}

impl EntityKind {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Ok(Self::Person);
        }
        match s.to_ascii_lowercase().as_str() {
            "person" => Ok(Self::Person),
            "organization" | "organisation" | "company" | "legalentity" => Ok(Self::Organization),
            other => Err(ValidationError(format!(
                "entity_type must be Person or Organization, got {other:?}"
            ))),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "Person",
            Self::Organization => "Organization",
        }
    }
}

impl Default for EntityKind {
    fn default() -> Self {
        Self::Person
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stable 256-bit entity fingerprint, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.len() != ENTITY_KEY_HEX_LEN {
            return Err(ValidationError(format!(
                "entity_key must be {ENTITY_KEY_HEX_LEN} hex characters"
            )));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(ValidationError(
                "entity_key must be lowercase hex".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened prefix for log lines; never used as an identifier.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unicode NFKD fold, strip combining marks (everything non-ASCII after the
/// fold), drop punctuation, lowercase, collapse internal whitespace.
#[must_use]
pub fn normalize_name(input: &str) -> String {
    let folded: String = input
        .nfkd()
        .filter(char::is_ascii)
        .filter(|c| c.is_ascii_alphanumeric() || c.is_ascii_whitespace())
        .collect();
    folded
        .split_ascii_whitespace()
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A recognized date of birth: a full calendar date or a bare year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dob {
    Date(NaiveDate),
    Year(i32),
}

impl Dob {
    /// Canonical `YYYY-MM-DD` rendering used by the fingerprint. A bare year
    /// renders as the first of January, matching the permissive upstream
    /// date parser.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Year(y) => format!("{y:04}-01-01"),
        }
    }

    #[must_use]
    pub fn year(&self) -> i32 {
        match self {
            Self::Date(d) => chrono::Datelike::year(d),
            Self::Year(y) => *y,
        }
    }

    #[must_use]
    pub fn is_year_only(&self) -> bool {
        matches!(self, Self::Year(_))
    }

    #[must_use]
    pub fn matches(&self, other: &Dob) -> bool {
        match (self, other) {
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => self.year() == other.year(),
        }
    }
}

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d-%m-%Y", "%Y/%m/%d", "%d/%m/%Y"];

/// Accepts `YYYY-MM-DD`, `DD-MM-YYYY`, slash variants, a bare `YYYY`, and
/// ISO datetime forms (the date part wins). Anything else is no DOB.
#[must_use]
pub fn normalize_dob(input: &str) -> Option<Dob> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i32>().ok().map(Dob::Year);
    }
    let date_part = s.get(..10).unwrap_or(s);
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(date_part, fmt) {
            return Some(Dob::Date(d));
        }
    }
    None
}

/// Derive the stable entity fingerprint:
/// `SHA-256(normalize(name) | "|" | lowercase(entity_type) | "|" | normalize(dob or ""))`.
pub fn derive_entity_key(
    display_name: &str,
    entity_type: EntityKind,
    dob: Option<&str>,
) -> Result<EntityKey, ValidationError> {
    let name = normalize_name(display_name);
    if name.is_empty() {
        return Err(ValidationError(
            "name must not be empty after normalization".to_string(),
        ));
    }
    let dob_part = dob
        .and_then(normalize_dob)
        .map(|d| d.canonical())
        .unwrap_or_default();
    let payload = format!(
        "{name}|{}|{dob_part}",
        entity_type.as_str().to_ascii_lowercase()
    );
    Ok(EntityKey(crate::sha256_hex(payload.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_name_folds_accents_case_and_whitespace() {
        assert_eq!(normalize_name("  José   Núñez "), "jose nunez");
        assert_eq!(normalize_name("O'Brien, MÜLLER"), "obrien muller");
        assert_eq!(normalize_name("…"), "");
    }

    #[test]
    fn dob_forms_normalize_to_iso() {
        assert_eq!(normalize_dob("1980-05-01").unwrap().canonical(), "1980-05-01");
        assert_eq!(normalize_dob("01-05-1980").unwrap().canonical(), "1980-05-01");
        assert_eq!(normalize_dob("1980").unwrap().canonical(), "1980-01-01");
        assert_eq!(
            normalize_dob("1980-05-01T12:00:00Z").unwrap().canonical(),
            "1980-05-01"
        );
        assert!(normalize_dob("not a date").is_none());
        assert!(normalize_dob("").is_none());
    }

    #[test]
    fn year_only_dob_matches_on_year() {
        let year = normalize_dob("1970").unwrap();
        let full = normalize_dob("1970-06-15").unwrap();
        assert!(year.matches(&full));
        assert!(!year.matches(&normalize_dob("1971-06-15").unwrap()));
    }

    #[test]
    fn entity_key_rejects_non_hex() {
        assert!(EntityKey::parse(&"a".repeat(64)).is_ok());
        assert!(EntityKey::parse(&"Z".repeat(64)).is_err());
        assert!(EntityKey::parse("abc").is_err());
    }

    #[test]
    fn derive_rejects_empty_name() {
        let err = derive_entity_key("  …  ", EntityKind::Person, None).unwrap_err();
        assert!(err.0.contains("empty"));
    }
}
