use crate::{Confidence, EntityKey, RiskLevel, ScreeningStatus};
use serde::{Deserialize, Serialize};

/// Timestamp rendering inside `Check Summary.Date`.
pub const CHECK_SUMMARY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Advisory suggestion row: `[name, score]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopMatch(pub String, pub u8);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    #[serde(rename = "Status")]
    pub status: ScreeningStatus,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Date")]
    pub date: String,
}

/// The frozen screening response body. Key names are a wire contract shared
/// with integrated applications; do not rename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningReport {
    #[serde(rename = "Check Summary")]
    pub check_summary: CheckSummary,
    #[serde(rename = "Risk Level")]
    pub risk_level: RiskLevel,
    #[serde(rename = "Confidence")]
    pub confidence: Confidence,
    #[serde(rename = "Is Sanctioned")]
    pub is_sanctioned: bool,
    #[serde(rename = "Is PEP")]
    pub is_pep: bool,
    #[serde(rename = "Sanctions Name")]
    pub sanctions_name: Option<String>,
    #[serde(rename = "Birth Date")]
    pub birth_date: Option<String>,
    #[serde(rename = "Regime")]
    pub regime: Option<String>,
    #[serde(rename = "Position")]
    pub position: Option<String>,
    #[serde(rename = "Topics")]
    pub topics: Option<String>,
    #[serde(rename = "Score")]
    pub score: u8,
    #[serde(rename = "Top Matches")]
    pub top_matches: Vec<TopMatch>,
    #[serde(rename = "Match Found")]
    pub match_found: bool,
    #[serde(rename = "entity_key", skip_serializing_if = "Option::is_none")]
    pub entity_key: Option<EntityKey>,
}

impl ScreeningReport {
    /// A cleared report with no decision candidate.
    #[must_use]
    pub fn cleared(source: String, date: String, top_matches: Vec<TopMatch>) -> Self {
        Self {
            check_summary: CheckSummary {
                status: ScreeningStatus::Cleared,
                source,
                date,
            },
            risk_level: RiskLevel::Cleared,
            confidence: Confidence::VeryHigh,
            is_sanctioned: false,
            is_pep: false,
            sanctions_name: None,
            birth_date: None,
            regime: None,
            position: None,
            topics: None,
            score: 0,
            top_matches,
            match_found: false,
            entity_key: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> ScreeningStatus {
        self.check_summary.status
    }

    /// UK-scoped sanction detection over the attributed source labels.
    #[must_use]
    pub fn uk_sanctions_flag(&self) -> bool {
        let src = self.check_summary.source.to_ascii_lowercase();
        self.is_sanctioned
            && ["hm treasury", "hmt", "ofsi", "uk financial sanctions", "uk fcdo"]
                .iter()
                .any(|needle| src.contains(needle))
    }
}
