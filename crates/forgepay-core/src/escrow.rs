//! Escrow contract shapes as the remote escrow service reports them.
//!
//! The contract is owned by the ledger, not by this system. Fields the
//! service may omit are defaulted so that a partial response still parses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::AccountId;

/// Accounts holding each contract role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowRoles {
    pub approver: AccountId,
    pub service_provider: AccountId,
    pub platform_address: AccountId,
    #[serde(alias = "release")]
    pub release_signer: AccountId,
    pub dispute_resolver: AccountId,
}

/// The settlement asset a contract is funded in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trustline {
    pub address: AccountId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MilestoneFlags {
    pub approved: bool,
    pub released: bool,
    pub disputed: bool,
    pub resolved: bool,
}

/// One entry of the contract's milestone array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowMilestone {
    /// Holds the local milestone's title, by convention set at deploy time.
    pub description: String,
    pub amount: Decimal,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub flags: MilestoneFlags,
    #[serde(default)]
    pub evidence: Option<String>,
}

impl EscrowMilestone {
    pub fn is_approved(&self) -> bool {
        self.flags.approved
    }

    pub fn is_completed(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("completed"))
    }
}

/// Live state of a deployed escrow contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Escrow {
    #[serde(default)]
    pub contract_id: Option<String>,
    #[serde(default)]
    pub engagement_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub escrow_type: Option<String>,
    #[serde(default)]
    pub roles: Option<EscrowRoles>,
    #[serde(default)]
    pub platform_fee: Option<Decimal>,
    #[serde(default)]
    pub milestones: Vec<EscrowMilestone>,
    #[serde(default)]
    pub trustline: Option<Trustline>,
    #[serde(default)]
    pub balance: Option<Decimal>,
}

impl Escrow {
    pub fn milestone(&self, index: usize) -> Option<&EscrowMilestone> {
        self.milestones.get(index)
    }
}
