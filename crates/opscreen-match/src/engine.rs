// SPDX-License-Identifier: Apache-2.0

use crate::similarity::token_set_ratio;
use crate::snapshot::{IndexedRow, SourceKind, WatchlistSnapshot};
use crate::{CLEARED_SOURCE_LABEL, PEP_SOURCE_LABEL};
use chrono::Utc;
use opscreen_model::{
    normalize_dob, normalize_name, CheckSummary, Confidence, Dob, EntityKind, RiskLevel,
    ScreeningReport, ScreeningStatus, TopMatch, CHECK_SUMMARY_DATE_FORMAT,
};
use std::collections::BTreeSet;

const TOP_MATCH_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct MatchSettings {
    pub match_threshold: u8,
    pub suggestion_threshold: u8,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            match_threshold: 75,
            suggestion_threshold: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScreenInput<'a> {
    pub name: &'a str,
    pub dob: Option<&'a str>,
    pub entity_type: EntityKind,
}

/// A decision plus the watchlist row identity it rests on, kept out of the
/// wire report so the refresh coordinator can target re-screens.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub report: ScreeningReport,
    pub matched_row_id: Option<String>,
}

struct Scored<'a> {
    row: &'a IndexedRow,
    score: u8,
}

fn best_score(query: &str, row: &IndexedRow) -> u8 {
    let mut best = token_set_ratio(query, &row.normalized_name);
    for alias in &row.normalized_aliases {
        best = best.max(token_set_ratio(query, alias));
    }
    best
}

fn dob_compatible(query: Option<&Dob>, candidate: Option<&Dob>) -> bool {
    match query {
        None => true,
        Some(q) => candidate.is_some_and(|c| q.matches(c)),
    }
}

/// Run the two-pass decision procedure against a snapshot.
///
/// Sanctions decision candidates take precedence over PEP candidates; the
/// advisory top-matches list ignores the DOB constraint by design.
#[must_use]
pub fn run_screening(
    input: &ScreenInput<'_>,
    snapshot: &WatchlistSnapshot,
    settings: &MatchSettings,
) -> MatchOutcome {
    let query = normalize_name(input.name);
    let query_dob = input.dob.and_then(normalize_dob);
    let date = Utc::now().format(CHECK_SUMMARY_DATE_FORMAT).to_string();

    let mut scored: Vec<Scored<'_>> = snapshot
        .indexed_rows()
        .iter()
        .filter(|r| r.kind == Some(input.entity_type) && !r.normalized_name.is_empty())
        .filter_map(|row| {
            let score = best_score(&query, row);
            (score >= settings.suggestion_threshold).then_some(Scored { row, score })
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.row.row.name.cmp(&b.row.row.name))
    });

    let top_matches: Vec<TopMatch> = scored
        .iter()
        .take(TOP_MATCH_LIMIT)
        .map(|s| TopMatch(s.row.row.name.clone(), s.score))
        .collect();

    let decision = |kind: SourceKind| {
        scored.iter().find(|s| {
            s.row.row.source_type == kind
                && s.score >= settings.match_threshold
                && dob_compatible(query_dob.as_ref(), s.row.dob.as_ref())
        })
    };
    let sanction_hit = decision(SourceKind::Sanctions);
    let pep_hit = decision(SourceKind::Peps);

    if let Some(hit) = sanction_hit {
        let regimes: BTreeSet<&'static str> = scored
            .iter()
            .filter(|s| {
                s.row.row.source_type == SourceKind::Sanctions
                    && s.score >= settings.match_threshold
                    && dob_compatible(query_dob.as_ref(), s.row.dob.as_ref())
            })
            .filter_map(|s| s.row.row.canonical_regime())
            .collect();
        let mut sources: Vec<&str> = regimes.into_iter().collect();
        if pep_hit.is_some() {
            sources.push(PEP_SOURCE_LABEL);
        }
        let source = if sources.is_empty() {
            CLEARED_SOURCE_LABEL.to_string()
        } else {
            sources.join(", ")
        };
        let row = &hit.row.row;
        return MatchOutcome {
            report: ScreeningReport {
                check_summary: CheckSummary {
                    status: ScreeningStatus::FailSanction,
                    source,
                    date,
                },
                risk_level: RiskLevel::HighRisk,
                confidence: Confidence::for_decision_score(hit.score),
                is_sanctioned: true,
                is_pep: pep_hit.is_some(),
                sanctions_name: Some(row.name.clone()),
                birth_date: row.birth_date.clone(),
                regime: row
                    .canonical_regime()
                    .map(str::to_string)
                    .or_else(|| row.regime.clone()),
                position: row.position.clone(),
                topics: row.topics.clone(),
                score: hit.score,
                top_matches,
                match_found: true,
                entity_key: None,
            },
            matched_row_id: Some(row.id.clone()),
        };
    }

    if let Some(hit) = pep_hit {
        let row = &hit.row.row;
        return MatchOutcome {
            report: ScreeningReport {
                check_summary: CheckSummary {
                    status: ScreeningStatus::FailPep,
                    source: PEP_SOURCE_LABEL.to_string(),
                    date,
                },
                risk_level: RiskLevel::MediumRisk,
                confidence: Confidence::for_decision_score(hit.score),
                is_sanctioned: false,
                is_pep: true,
                sanctions_name: Some(row.name.clone()),
                birth_date: row.birth_date.clone(),
                regime: None,
                position: row.position.clone(),
                topics: row.topics.clone(),
                score: hit.score,
                top_matches,
                match_found: true,
                entity_key: None,
            },
            matched_row_id: Some(row.id.clone()),
        };
    }

    MatchOutcome {
        report: ScreeningReport::cleared(CLEARED_SOURCE_LABEL.to_string(), date, top_matches),
        matched_row_id: None,
    }
}
