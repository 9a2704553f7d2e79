// SPDX-License-Identifier: Apache-2.0

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Terminal screening decision. Serialized under its display label so the
/// wire contract and the persisted `status` column stay identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScreeningStatus {
    Cleared,
    #[serde(rename = "Fail PEP")]
    FailPep,
    #[serde(rename = "Fail Sanction")]
    FailSanction,
}

impl ScreeningStatus {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cleared => "Cleared",
            Self::FailPep => "Fail PEP",
            Self::FailSanction => "Fail Sanction",
        }
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        match input {
            "Cleared" => Ok(Self::Cleared),
            "Fail PEP" => Ok(Self::FailPep),
            "Fail Sanction" => Ok(Self::FailSanction),
            other => Err(ValidationError(format!("unknown status {other:?}"))),
        }
    }

    #[must_use]
    pub fn is_failing(&self) -> bool {
        !matches!(self, Self::Cleared)
    }
}

impl Display for ScreeningStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Cleared,
    #[serde(rename = "Medium Risk")]
    MediumRisk,
    #[serde(rename = "High Risk")]
    HighRisk,
}

impl RiskLevel {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cleared => "Cleared",
            Self::MediumRisk => "Medium Risk",
            Self::HighRisk => "High Risk",
        }
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        match input {
            "Cleared" => Ok(Self::Cleared),
            "Medium Risk" => Ok(Self::MediumRisk),
            "High Risk" => Ok(Self::HighRisk),
            other => Err(ValidationError(format!("unknown risk level {other:?}"))),
        }
    }
}

impl Display for RiskLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    #[serde(rename = "Very High")]
    VeryHigh,
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Band for a failing decision score: >=90 High, >=80 Medium, else Low.
    /// The cleared case is Very High and never goes through this function.
    #[must_use]
    pub fn for_decision_score(score: u8) -> Self {
        if score >= 90 {
            Self::High
        } else if score >= 80 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::VeryHigh => "Very High",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        match input {
            "Very High" => Ok(Self::VeryHigh),
            "High" => Ok(Self::High),
            "Medium" => Ok(Self::Medium),
            "Low" => Ok(Self::Low),
            other => Err(ValidationError(format!("unknown confidence {other:?}"))),
        }
    }
}

impl Display for Confidence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The fixed reason-for-check enumeration accepted by the dispatch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckReason {
    #[serde(rename = "Client Onboarding")]
    ClientOnboarding,
    #[serde(rename = "Claim Payment")]
    ClaimPayment,
    #[serde(rename = "Business Partner Payment")]
    BusinessPartnerPayment,
    #[serde(rename = "Business Partner Due Diligence")]
    BusinessPartnerDueDiligence,
    #[serde(rename = "Periodic Re-Screen")]
    PeriodicReScreen,
    #[serde(rename = "Ad-Hoc Compliance Review")]
    AdHocComplianceReview,
}

impl CheckReason {
    pub const ALL: [CheckReason; 6] = [
        Self::ClientOnboarding,
        Self::ClaimPayment,
        Self::BusinessPartnerPayment,
        Self::BusinessPartnerDueDiligence,
        Self::PeriodicReScreen,
        Self::AdHocComplianceReview,
    ];

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::ClientOnboarding => "Client Onboarding",
            Self::ClaimPayment => "Claim Payment",
            Self::BusinessPartnerPayment => "Business Partner Payment",
            Self::BusinessPartnerDueDiligence => "Business Partner Due Diligence",
            Self::PeriodicReScreen => "Periodic Re-Screen",
            Self::AdHocComplianceReview => "Ad-Hoc Compliance Review",
        }
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.label() == input.trim())
            .ok_or_else(|| ValidationError(format!("unknown reason_for_check {input:?}")))
    }
}

impl Display for CheckReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewState {
    #[serde(rename = "UNREVIEWED")]
    Unreviewed,
    #[serde(rename = "IN_REVIEW")]
    InReview,
    #[serde(rename = "COMPLETED")]
    Completed,
}

impl ReviewState {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unreviewed => "UNREVIEWED",
            Self::InReview => "IN_REVIEW",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        match input {
            "UNREVIEWED" => Ok(Self::Unreviewed),
            "IN_REVIEW" => Ok(Self::InReview),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(ValidationError(format!("unknown review state {other:?}"))),
        }
    }
}

impl Display for ReviewState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Structured analyst decision attached when a review completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewOutcome {
    #[serde(rename = "False Positive – Proceeded")]
    FalsePositiveProceeded,
    #[serde(rename = "False Positive – Payment Released")]
    FalsePositivePaymentReleased,
    #[serde(rename = "Confirmed Match – Payment Blocked")]
    ConfirmedMatchPaymentBlocked,
    #[serde(rename = "Confirmed Match – Escalated to Compliance")]
    ConfirmedMatchEscalated,
    #[serde(rename = "Pending External Review")]
    PendingExternalReview,
    #[serde(rename = "Cancelled / No Action Required")]
    CancelledNoAction,
}

impl ReviewOutcome {
    pub const ALL: [ReviewOutcome; 6] = [
        Self::FalsePositiveProceeded,
        Self::FalsePositivePaymentReleased,
        Self::ConfirmedMatchPaymentBlocked,
        Self::ConfirmedMatchEscalated,
        Self::PendingExternalReview,
        Self::CancelledNoAction,
    ];

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::FalsePositiveProceeded => "False Positive – Proceeded",
            Self::FalsePositivePaymentReleased => "False Positive – Payment Released",
            Self::ConfirmedMatchPaymentBlocked => "Confirmed Match – Payment Blocked",
            Self::ConfirmedMatchEscalated => "Confirmed Match – Escalated to Compliance",
            Self::PendingExternalReview => "Pending External Review",
            Self::CancelledNoAction => "Cancelled / No Action Required",
        }
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        Self::ALL
            .iter()
            .copied()
            .find(|o| o.label() == input.trim())
            .ok_or_else(|| ValidationError(format!("unknown review outcome {input:?}")))
    }
}

impl Display for ReviewOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Outcome transition recorded when a job terminates, comparing the prior
/// evidence status with the freshly produced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    NewResult,
    Unchanged,
    ClearedToFail,
    FailToCleared,
    Changed,
}

impl Transition {
    #[must_use]
    pub fn between(previous: Option<ScreeningStatus>, next: ScreeningStatus) -> Self {
        match previous {
            None => Self::NewResult,
            Some(prev) if prev == next => Self::Unchanged,
            Some(ScreeningStatus::Cleared) => Self::ClearedToFail,
            Some(_) if next == ScreeningStatus::Cleared => Self::FailToCleared,
            Some(_) => Self::Changed,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::NewResult => "new_result",
            Self::Unchanged => "unchanged",
            Self::ClearedToFail => "cleared_to_fail",
            Self::FailToCleared => "fail_to_cleared",
            Self::Changed => "changed",
        }
    }
}

impl Display for Transition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip() {
        for s in [
            ScreeningStatus::Cleared,
            ScreeningStatus::FailPep,
            ScreeningStatus::FailSanction,
        ] {
            assert_eq!(ScreeningStatus::parse(s.label()).unwrap(), s);
        }
    }

    #[test]
    fn confidence_bands() {
        assert_eq!(Confidence::for_decision_score(92), Confidence::High);
        assert_eq!(Confidence::for_decision_score(90), Confidence::High);
        assert_eq!(Confidence::for_decision_score(85), Confidence::Medium);
        assert_eq!(Confidence::for_decision_score(79), Confidence::Low);
    }

    #[test]
    fn reason_set_is_closed() {
        assert!(CheckReason::parse("Client Onboarding").is_ok());
        assert!(CheckReason::parse("Curiosity").is_err());
    }

    #[test]
    fn transition_classification() {
        use ScreeningStatus::{Cleared, FailPep, FailSanction};
        assert_eq!(Transition::between(None, Cleared), Transition::NewResult);
        assert_eq!(
            Transition::between(Some(Cleared), Cleared),
            Transition::Unchanged
        );
        assert_eq!(
            Transition::between(Some(Cleared), FailSanction),
            Transition::ClearedToFail
        );
        assert_eq!(
            Transition::between(Some(FailPep), Cleared),
            Transition::FailToCleared
        );
        assert_eq!(
            Transition::between(Some(FailPep), FailSanction),
            Transition::Changed
        );
    }
}
