//! Relational records for organizations, projects, milestones, and evidences.
//!
//! These mirror the rows the store persists. Status enums carry their own
//! transition rules; the store and orchestrator consult them rather than
//! comparing strings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::account::AccountId;
use crate::draft::milestone_amount;

/// Prefix of the placeholder contract id written when escrow creation is skipped.
pub const SYNTHETIC_CONTRACT_PREFIX: &str = "dev-escrow-";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} {value:?}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

// ── Organizations ──

/// Which side of an engagement an organization sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationType {
    /// Pays for work (the contractor).
    Requester,
    /// Performs work (the freelancer).
    Provider,
}

impl OrganizationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Provider => "provider",
        }
    }
}

impl FromStr for OrganizationType {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requester" => Ok(Self::Requester),
            "provider" => Ok(Self::Provider),
            other => Err(ParseStatusError {
                kind: "organization type",
                value: other.to_string(),
            }),
        }
    }
}

/// A tenant: an individual or a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub legal_name: String,
    pub tax_id: Option<String>,
    pub address: Option<String>,
    pub business_type: Option<String>,
    pub industry_type: Option<String>,
    pub org_type: OrganizationType,
    /// Ledger account that signs for or receives funds on behalf of this organization.
    pub wallet_address: Option<AccountId>,
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker. Deleted organizations are never physically removed.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Organization {
    pub fn new(legal_name: impl Into<String>, org_type: OrganizationType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            legal_name: legal_name.into(),
            tax_id: None,
            address: None,
            business_type: None,
            industry_type: None,
            org_type,
            wallet_address: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn with_wallet(mut self, wallet: AccountId) -> Self {
        self.wallet_address = Some(wallet);
        self
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

// ── Projects ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Active,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseStatusError {
                kind: "project status",
                value: other.to_string(),
            }),
        }
    }
}

/// A unit of work between a contractor (payer) and a freelancer (payee).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    /// Caller-generated id sent with the escrow deploy request.
    pub engagement_id: String,
    pub title: String,
    pub description: String,
    pub total_amount: Decimal,
    pub expected_delivery_date: NaiveDate,
    pub status: ProjectStatus,
    /// Escrow contract id. Set once at creation and never changed afterwards.
    pub contract_id: Option<String>,
    pub contractor_id: String,
    pub freelancer_id: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Whether the contract id is a development placeholder rather than a deployed escrow.
    pub fn has_synthetic_contract(&self) -> bool {
        self.contract_id
            .as_deref()
            .is_some_and(|id| id.starts_with(SYNTHETIC_CONTRACT_PREFIX))
    }
}

// ── Milestones ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    /// Statuses only move forward, one step at a time.
    pub fn can_transition_to(&self, next: MilestoneStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress) | (Self::InProgress, Self::Completed)
        )
    }
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MilestoneStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(ParseStatusError {
                kind: "milestone status",
                value: other.to_string(),
            }),
        }
    }
}

/// A percentage slice of a project's total amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub percentage: u8,
    pub status: MilestoneStatus,
    /// Position of this milestone in the escrow contract's milestone array,
    /// recorded at creation time from the deploy payload order.
    pub contract_index: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Milestone {
    /// This milestone's share of `total`.
    pub fn amount(&self, total: Decimal) -> Decimal {
        milestone_amount(total, self.percentage)
    }
}

/// A file attached to a milestone as proof of delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub milestone_id: String,
    pub file_url: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestone_status_moves_forward_one_step() {
        use MilestoneStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Completed));
    }

    #[test]
    fn status_strings_roundtrip() {
        for s in [
            MilestoneStatus::Pending,
            MilestoneStatus::InProgress,
            MilestoneStatus::Completed,
        ] {
            assert_eq!(s.as_str().parse::<MilestoneStatus>().unwrap(), s);
        }
        for s in [
            ProjectStatus::Draft,
            ProjectStatus::Active,
            ProjectStatus::Completed,
            ProjectStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<ProjectStatus>().unwrap(), s);
        }
    }

    #[test]
    fn unknown_status_is_an_error() {
        let err = "done".parse::<MilestoneStatus>().unwrap_err();
        assert_eq!(err.kind, "milestone status");
        assert_eq!(err.to_string(), "unknown milestone status \"done\"");
    }

    #[test]
    fn synthetic_contract_detection() {
        let mut project = Project {
            id: "p1".into(),
            engagement_id: "e1".into(),
            title: "Site".into(),
            description: String::new(),
            total_amount: Decimal::new(1000, 0),
            expected_delivery_date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
            status: ProjectStatus::Active,
            contract_id: Some("CABC".into()),
            contractor_id: "c".into(),
            freelancer_id: "f".into(),
            created_at: Utc::now(),
        };
        assert!(!project.has_synthetic_contract());
        project.contract_id = Some(format!("{SYNTHETIC_CONTRACT_PREFIX}123"));
        assert!(project.has_synthetic_contract());
        project.contract_id = None;
        assert!(!project.has_synthetic_contract());
    }

    #[test]
    fn organization_soft_delete_flag() {
        let mut org = Organization::new("Acme Ltd", OrganizationType::Requester);
        assert!(org.is_active());
        org.deleted_at = Some(Utc::now());
        assert!(!org.is_active());
    }
}
