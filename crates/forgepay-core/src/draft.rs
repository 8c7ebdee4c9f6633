//! Project drafts: the input to project creation, and the rules it must pass
//! before anything is sent to the escrow service.

use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejections raised before any side effect. Correcting the input and
/// resubmitting is always safe.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("project title is empty")]
    BlankProjectTitle,
    #[error("total amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("total amount {0} exceeds the maximum of 10^24")]
    AmountTooLarge(Decimal),
    #[error("amount {0} has more than 7 decimal places")]
    AmountPrecision(Decimal),
    #[error("milestone {title:?} amount {amount} has more than 7 decimal places")]
    MilestoneAmountPrecision { title: String, amount: Decimal },
    #[error("a project needs at least one milestone")]
    NoMilestones,
    #[error("milestone {index} has an empty title")]
    BlankMilestoneTitle { index: usize },
    #[error("milestone {title:?} has percentage {percentage}, expected 0-100")]
    PercentageOutOfRange { title: String, percentage: u8 },
    #[error("milestone title {0:?} is used more than once")]
    DuplicateMilestoneTitle(String),
    #[error("milestone percentages sum to {0}, expected exactly 100")]
    PercentageSum(u32),
    #[error("no collaborator assigned")]
    NoCollaborator,
    #[error("organization {0} not found")]
    UnknownOrganization(String),
    #[error("organization {0} has been deleted")]
    InactiveOrganization(String),
    #[error("organization {0} has no wallet address")]
    MissingWallet(String),
    #[error("signer {actual} does not match the contractor wallet {expected}")]
    SignerMismatch { expected: String, actual: String },
}

/// Decimal places the ledger and the store keep for an amount.
pub const LEDGER_DECIMALS: u32 = 7;

/// Largest accepted project total (10^24); keeps every milestone split in range.
pub const MAX_TOTAL_AMOUNT: Decimal = Decimal::from_parts(0xA100_0000, 0x1BCE_CCED, 0xD3C2, false, 0);

/// One milestone of a project draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub percentage: u8,
}

/// Everything needed to create a project and its escrow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub total_amount: Decimal,
    pub expected_delivery_date: NaiveDate,
    /// Requester organization paying for the work.
    pub contractor_id: String,
    /// Provider organization doing the work.
    pub freelancer_id: Option<String>,
    pub milestones: Vec<MilestoneDraft>,
}

impl ProjectDraft {
    /// Check the draft's own invariants. Organization lookups happen later,
    /// against the store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::BlankProjectTitle);
        }
        if self.total_amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(self.total_amount));
        }
        if self.total_amount > MAX_TOTAL_AMOUNT {
            return Err(ValidationError::AmountTooLarge(self.total_amount));
        }
        if exceeds_ledger_precision(self.total_amount) {
            return Err(ValidationError::AmountPrecision(self.total_amount));
        }
        if self.milestones.is_empty() {
            return Err(ValidationError::NoMilestones);
        }

        let mut seen = HashSet::new();
        for (index, m) in self.milestones.iter().enumerate() {
            if m.title.trim().is_empty() {
                return Err(ValidationError::BlankMilestoneTitle { index });
            }
            if m.percentage > 100 {
                return Err(ValidationError::PercentageOutOfRange {
                    title: m.title.clone(),
                    percentage: m.percentage,
                });
            }
            // Titles become contract-side descriptions; they must identify a milestone.
            if !seen.insert(m.title.as_str()) {
                return Err(ValidationError::DuplicateMilestoneTitle(m.title.clone()));
            }
        }

        let sum = self.percentage_sum();
        if sum != 100 {
            return Err(ValidationError::PercentageSum(sum));
        }

        for (m, amount) in self.milestones.iter().zip(self.milestone_amounts()) {
            if exceeds_ledger_precision(amount) {
                return Err(ValidationError::MilestoneAmountPrecision {
                    title: m.title.clone(),
                    amount,
                });
            }
        }

        match self.freelancer_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(()),
            _ => Err(ValidationError::NoCollaborator),
        }
    }

    pub fn percentage_sum(&self) -> u32 {
        self.milestones.iter().map(|m| m.percentage as u32).sum()
    }

    /// Amount of each milestone, in draft order.
    pub fn milestone_amounts(&self) -> Vec<Decimal> {
        self.milestones
            .iter()
            .map(|m| milestone_amount(self.total_amount, m.percentage))
            .collect()
    }
}

/// `total × percentage / 100`, exact in decimal arithmetic for any total a
/// draft accepts. Totals near `Decimal::MAX` divide first instead of overflowing.
pub fn milestone_amount(total: Decimal, percentage: u8) -> Decimal {
    let pct = Decimal::from(percentage);
    match total.checked_mul(pct) {
        Some(scaled) => scaled / Decimal::ONE_HUNDRED,
        None => total / Decimal::ONE_HUNDRED * pct,
    }
}

fn exceeds_ledger_precision(amount: Decimal) -> bool {
    amount.normalize().scale() > LEDGER_DECIMALS
}
