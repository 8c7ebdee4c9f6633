//! The escrow service contract: request payloads, transaction envelopes, and
//! the [`EscrowGateway`] trait both the HTTP client and the mock implement.

use async_trait::async_trait;
use forgepay_core::{AccountId, Escrow, EscrowRoles, Trustline};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::GatewayError;
use crate::signer::TransactionSigner;

/// One entry of the milestone array sent at deploy time.
///
/// The array order is the contract's milestone index order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployMilestone {
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub receiver: AccountId,
}

/// Initialize a multi-release escrow contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub signer: AccountId,
    pub engagement_id: String,
    pub title: String,
    pub description: String,
    pub roles: EscrowRoles,
    #[serde(with = "rust_decimal::serde::float")]
    pub platform_fee: Decimal,
    pub milestones: Vec<DeployMilestone>,
    pub trustline: Trustline,
}

/// Move funds from the signer into a deployed contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundRequest {
    pub contract_id: String,
    pub signer: AccountId,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveMilestoneRequest {
    pub contract_id: String,
    pub milestone_index: u32,
    pub approver: AccountId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMilestoneStatusRequest {
    pub contract_id: String,
    pub milestone_index: u32,
    pub new_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_evidence: Option<String>,
    pub service_provider: AccountId,
}

/// A base64 ledger transaction envelope awaiting a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub xdr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub xdr: String,
}

/// What the ledger reported for an accepted transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A deploy transaction created a contract.
    Deployed {
        contract_id: String,
        escrow: Option<Escrow>,
        message: String,
    },
    /// Any other transaction was applied to an existing contract.
    Applied { message: String },
}

impl SubmitOutcome {
    pub fn contract_id(&self) -> Option<&str> {
        match self {
            Self::Deployed { contract_id, .. } => Some(contract_id),
            Self::Applied { .. } => None,
        }
    }
}

/// The remote escrow service.
///
/// Every state change is two round trips: build an unsigned transaction,
/// then submit it once signed. Implementations never retry.
#[async_trait]
pub trait EscrowGateway: Send + Sync {
    async fn deploy_escrow(&self, req: &DeployRequest)
    -> Result<UnsignedTransaction, GatewayError>;

    async fn fund_escrow(&self, req: &FundRequest) -> Result<UnsignedTransaction, GatewayError>;

    async fn approve_milestone(
        &self,
        req: &ApproveMilestoneRequest,
    ) -> Result<UnsignedTransaction, GatewayError>;

    async fn change_milestone_status(
        &self,
        req: &ChangeMilestoneStatusRequest,
    ) -> Result<UnsignedTransaction, GatewayError>;

    async fn submit_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<SubmitOutcome, GatewayError>;

    /// Current contract state as the ledger holds it.
    async fn get_escrow(&self, contract_id: &str) -> Result<Escrow, GatewayError>;

    /// Sign `tx` locally and submit it.
    async fn sign_and_submit(
        &self,
        tx: UnsignedTransaction,
        signer: &dyn TransactionSigner,
    ) -> Result<SubmitOutcome, GatewayError> {
        let signed = signer.sign(&tx)?;
        self.submit_transaction(&signed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account(byte: u8) -> AccountId {
        AccountId::from_public_key([byte; 32])
    }

    #[test]
    fn deploy_request_wire_shape() {
        let req = DeployRequest {
            signer: account(1),
            engagement_id: "eng-1".into(),
            title: "Marketing site".into(),
            description: "Landing pages".into(),
            roles: EscrowRoles {
                approver: account(1),
                service_provider: account(2),
                platform_address: account(9),
                release_signer: account(1),
                dispute_resolver: account(9),
            },
            platform_fee: Decimal::new(25, 1),
            milestones: vec![DeployMilestone {
                description: "Design".into(),
                amount: Decimal::new(50050, 2),
                receiver: account(2),
            }],
            trustline: Trustline {
                address: account(10),
                decimals: Some(10_000_000),
            },
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["engagementId"], json!("eng-1"));
        assert_eq!(value["platformFee"], json!(2.5));
        assert_eq!(value["milestones"][0]["amount"], json!(500.5));
        assert_eq!(value["milestones"][0]["receiver"], json!(account(2).as_str()));
        assert_eq!(value["roles"]["serviceProvider"], json!(account(2).as_str()));
        assert_eq!(value["roles"]["releaseSigner"], json!(account(1).as_str()));
        assert_eq!(value["trustline"]["decimals"], json!(10_000_000));
    }

    #[test]
    fn change_status_omits_missing_evidence() {
        let req = ChangeMilestoneStatusRequest {
            contract_id: "CABC".into(),
            milestone_index: 2,
            new_status: "completed".into(),
            new_evidence: None,
            service_provider: account(2),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "contractId": "CABC",
                "milestoneIndex": 2,
                "newStatus": "completed",
                "serviceProvider": account(2).as_str(),
            })
        );
    }

    #[test]
    fn outcome_contract_id() {
        let deployed = SubmitOutcome::Deployed {
            contract_id: "CABC".into(),
            escrow: None,
            message: String::new(),
        };
        assert_eq!(deployed.contract_id(), Some("CABC"));
        let applied = SubmitOutcome::Applied {
            message: "ok".into(),
        };
        assert_eq!(applied.contract_id(), None);
    }
}
