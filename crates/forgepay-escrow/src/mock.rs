//! In-memory escrow service for tests and offline runs.
//!
//! Transactions are opaque envelopes keyed by a random operation id; a
//! submitted envelope must carry at least one signature before its operation
//! is applied to the in-memory contract. Failures can be injected per
//! operation, either before anything happens or after the ledger applied it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use forgepay_core::{Escrow, EscrowMilestone, MilestoneFlags};
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::gateway::{
    ApproveMilestoneRequest, ChangeMilestoneStatusRequest, DeployRequest, EscrowGateway,
    FundRequest, SignedTransaction, SubmitOutcome, UnsignedTransaction,
};

const ENVELOPE_TYPE_TX: [u8; 4] = [0, 0, 0, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Deploy,
    Fund,
    Approve,
    ChangeStatus,
    Submit,
    GetEscrow,
}

#[derive(Debug, Clone)]
enum PendingOp {
    Deploy(DeployRequest),
    Fund(FundRequest),
    Approve(ApproveMilestoneRequest),
    ChangeStatus(ChangeMilestoneStatusRequest),
}

impl PendingOp {
    fn operation(&self) -> Operation {
        match self {
            Self::Deploy(_) => Operation::Deploy,
            Self::Fund(_) => Operation::Fund,
            Self::Approve(_) => Operation::Approve,
            Self::ChangeStatus(_) => Operation::ChangeStatus,
        }
    }
}

#[derive(Default)]
struct MockState {
    escrows: HashMap<String, Escrow>,
    pending: HashMap<[u8; 16], PendingOp>,
    calls: HashMap<Operation, u32>,
    failures: HashMap<Operation, u32>,
    timeouts_after_apply: HashMap<Operation, u32>,
}

impl MockState {
    fn enter(&mut self, op: Operation) -> Result<(), GatewayError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(GatewayError::Unavailable(format!("injected {op:?} failure")))
            }
            _ => Ok(()),
        }
    }

    fn take_timeout(&mut self, op: Operation) -> bool {
        match self.timeouts_after_apply.get_mut(&op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    fn stage(&mut self, op: PendingOp) -> UnsignedTransaction {
        let id = *Uuid::new_v4().as_bytes();
        self.pending.insert(id, op);
        let mut bytes = ENVELOPE_TYPE_TX.to_vec();
        bytes.extend_from_slice(&id);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        UnsignedTransaction {
            xdr: BASE64.encode(bytes),
        }
    }

    fn escrow_mut(&mut self, contract_id: &str) -> Result<&mut Escrow, GatewayError> {
        self.escrows
            .get_mut(contract_id)
            .ok_or_else(|| GatewayError::Rejected(format!("contract {contract_id} not found")))
    }

    fn milestone_mut(
        &mut self,
        contract_id: &str,
        index: u32,
    ) -> Result<&mut EscrowMilestone, GatewayError> {
        self.escrow_mut(contract_id)?
            .milestones
            .get_mut(index as usize)
            .ok_or_else(|| GatewayError::Rejected(format!("milestone index {index} out of range")))
    }

    fn apply(&mut self, op: PendingOp) -> Result<SubmitOutcome, GatewayError> {
        match op {
            PendingOp::Deploy(req) => {
                let contract_id = format!("C{}", Uuid::new_v4().simple()).to_uppercase();
                let escrow = Escrow {
                    contract_id: Some(contract_id.clone()),
                    engagement_id: Some(req.engagement_id),
                    title: req.title,
                    description: req.description,
                    escrow_type: Some("multi-release".into()),
                    roles: Some(req.roles),
                    platform_fee: Some(req.platform_fee),
                    milestones: req
                        .milestones
                        .into_iter()
                        .map(|m| EscrowMilestone {
                            description: m.description,
                            amount: m.amount,
                            receiver: Some(m.receiver.to_string()),
                            status: Some("pending".into()),
                            flags: MilestoneFlags::default(),
                            evidence: None,
                        })
                        .collect(),
                    trustline: Some(req.trustline),
                    balance: Some(Decimal::ZERO),
                };
                self.escrows.insert(contract_id.clone(), escrow.clone());
                Ok(SubmitOutcome::Deployed {
                    contract_id,
                    escrow: Some(escrow),
                    message: "escrow deployed".into(),
                })
            }
            PendingOp::Fund(req) => {
                let escrow = self.escrow_mut(&req.contract_id)?;
                escrow.balance = Some(escrow.balance.unwrap_or_default() + req.amount);
                Ok(SubmitOutcome::Applied {
                    message: "escrow funded".into(),
                })
            }
            PendingOp::Approve(req) => {
                let milestone = self.milestone_mut(&req.contract_id, req.milestone_index)?;
                if milestone.flags.approved {
                    return Err(GatewayError::Rejected("milestone already approved".into()));
                }
                milestone.flags.approved = true;
                Ok(SubmitOutcome::Applied {
                    message: "milestone approved".into(),
                })
            }
            PendingOp::ChangeStatus(req) => {
                let milestone = self.milestone_mut(&req.contract_id, req.milestone_index)?;
                milestone.status = Some(req.new_status);
                if req.new_evidence.is_some() {
                    milestone.evidence = req.new_evidence;
                }
                Ok(SubmitOutcome::Applied {
                    message: "milestone status changed".into(),
                })
            }
        }
    }
}

/// An [`EscrowGateway`] that keeps contracts in memory.
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `times` calls of `op` with [`GatewayError::Unavailable`],
    /// before any effect.
    pub fn fail_next(&self, op: Operation, times: u32) {
        self.state().failures.insert(op, times);
    }

    /// Apply the next submitted `op`, then report [`GatewayError::Timeout`].
    pub fn time_out_after_apply(&self, op: Operation) {
        *self.state().timeouts_after_apply.entry(op).or_default() += 1;
    }

    /// How many times `op` has been requested, failures included.
    pub fn calls(&self, op: Operation) -> u32 {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn escrow(&self, contract_id: &str) -> Option<Escrow> {
        self.state().escrows.get(contract_id).cloned()
    }

    pub fn escrow_count(&self) -> usize {
        self.state().escrows.len()
    }

    /// Edit a contract directly, as if another client had acted on the ledger.
    pub fn update_escrow(&self, contract_id: &str, f: impl FnOnce(&mut Escrow)) -> bool {
        match self.state().escrows.get_mut(contract_id) {
            Some(escrow) => {
                f(escrow);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl EscrowGateway for MockGateway {
    async fn deploy_escrow(
        &self,
        req: &DeployRequest,
    ) -> Result<UnsignedTransaction, GatewayError> {
        let mut state = self.state();
        state.enter(Operation::Deploy)?;
        Ok(state.stage(PendingOp::Deploy(req.clone())))
    }

    async fn fund_escrow(&self, req: &FundRequest) -> Result<UnsignedTransaction, GatewayError> {
        let mut state = self.state();
        state.enter(Operation::Fund)?;
        state.escrow_mut(&req.contract_id)?;
        Ok(state.stage(PendingOp::Fund(req.clone())))
    }

    async fn approve_milestone(
        &self,
        req: &ApproveMilestoneRequest,
    ) -> Result<UnsignedTransaction, GatewayError> {
        let mut state = self.state();
        state.enter(Operation::Approve)?;
        if state
            .milestone_mut(&req.contract_id, req.milestone_index)?
            .flags
            .approved
        {
            return Err(GatewayError::Rejected("milestone already approved".into()));
        }
        Ok(state.stage(PendingOp::Approve(req.clone())))
    }

    async fn change_milestone_status(
        &self,
        req: &ChangeMilestoneStatusRequest,
    ) -> Result<UnsignedTransaction, GatewayError> {
        let mut state = self.state();
        state.enter(Operation::ChangeStatus)?;
        state.milestone_mut(&req.contract_id, req.milestone_index)?;
        Ok(state.stage(PendingOp::ChangeStatus(req.clone())))
    }

    async fn submit_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<SubmitOutcome, GatewayError> {
        let bytes = BASE64
            .decode(&tx.xdr)
            .map_err(|e| GatewayError::Rejected(format!("malformed envelope: {e}")))?;
        if bytes.len() < 24 || bytes[..4] != ENVELOPE_TYPE_TX {
            return Err(GatewayError::Rejected("malformed envelope".into()));
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&bytes[4..20]);
        let signatures = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);

        let mut state = self.state();
        state.enter(Operation::Submit)?;
        if signatures == 0 {
            return Err(GatewayError::Rejected("tx_bad_auth: envelope is unsigned".into()));
        }
        let op = state
            .pending
            .remove(&id)
            .ok_or_else(|| GatewayError::Rejected("unknown or already submitted transaction".into()))?;
        let kind = op.operation();
        debug!(operation = ?kind, "applying mock transaction");
        let outcome = state.apply(op)?;
        if state.take_timeout(kind) {
            return Err(GatewayError::Timeout);
        }
        Ok(outcome)
    }

    async fn get_escrow(&self, contract_id: &str) -> Result<Escrow, GatewayError> {
        let mut state = self.state();
        state.enter(Operation::GetEscrow)?;
        state
            .escrows
            .get(contract_id)
            .cloned()
            .ok_or_else(|| GatewayError::Server {
                status: 404,
                body: format!("escrow {contract_id} not found"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::DeployMilestone;
    use crate::signer::{KeypairSigner, TESTNET_PASSPHRASE, TransactionSigner};
    use forgepay_core::{AccountId, EscrowRoles, Trustline};

    fn signer(seed: u8) -> KeypairSigner {
        KeypairSigner::from_seed([seed; 32], TESTNET_PASSPHRASE)
    }

    fn deploy_request(approver: AccountId, provider: AccountId) -> DeployRequest {
        DeployRequest {
            signer: approver.clone(),
            engagement_id: "eng-1".into(),
            title: "Site".into(),
            description: String::new(),
            roles: EscrowRoles {
                approver: approver.clone(),
                service_provider: provider.clone(),
                platform_address: AccountId::from_public_key([9; 32]),
                release_signer: approver,
                dispute_resolver: AccountId::from_public_key([9; 32]),
            },
            platform_fee: Decimal::ZERO,
            milestones: vec![
                DeployMilestone {
                    description: "Design".into(),
                    amount: Decimal::new(600, 0),
                    receiver: provider.clone(),
                },
                DeployMilestone {
                    description: "Build".into(),
                    amount: Decimal::new(400, 0),
                    receiver: provider,
                },
            ],
            trustline: Trustline {
                address: AccountId::from_public_key([10; 32]),
                decimals: None,
            },
        }
    }

    async fn deployed(gateway: &MockGateway) -> String {
        let approver = signer(1);
        let req = deploy_request(approver.public_key(), signer(2).public_key());
        let tx = gateway.deploy_escrow(&req).await.unwrap();
        gateway
            .sign_and_submit(tx, &approver)
            .await
            .unwrap()
            .contract_id()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn deploy_fund_approve_complete() {
        let gateway = MockGateway::new();
        let contract_id = deployed(&gateway).await;
        let approver = signer(1);
        let provider = signer(2);

        let tx = gateway
            .fund_escrow(&FundRequest {
                contract_id: contract_id.clone(),
                signer: approver.public_key(),
                amount: Decimal::new(1000, 0),
            })
            .await
            .unwrap();
        gateway.sign_and_submit(tx, &approver).await.unwrap();

        let tx = gateway
            .approve_milestone(&ApproveMilestoneRequest {
                contract_id: contract_id.clone(),
                milestone_index: 1,
                approver: approver.public_key(),
            })
            .await
            .unwrap();
        gateway.sign_and_submit(tx, &approver).await.unwrap();

        let tx = gateway
            .change_milestone_status(&ChangeMilestoneStatusRequest {
                contract_id: contract_id.clone(),
                milestone_index: 1,
                new_status: "completed".into(),
                new_evidence: None,
                service_provider: provider.public_key(),
            })
            .await
            .unwrap();
        gateway.sign_and_submit(tx, &provider).await.unwrap();

        let escrow = gateway.get_escrow(&contract_id).await.unwrap();
        assert_eq!(escrow.balance, Some(Decimal::new(1000, 0)));
        assert!(!escrow.milestones[0].is_approved());
        assert!(escrow.milestones[1].is_approved());
        assert!(escrow.milestones[1].is_completed());
    }

    #[tokio::test]
    async fn unsigned_submission_rejected() {
        let gateway = MockGateway::new();
        let req = deploy_request(signer(1).public_key(), signer(2).public_key());
        let tx = gateway.deploy_escrow(&req).await.unwrap();
        let err = gateway
            .submit_transaction(&SignedTransaction { xdr: tx.xdr })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
        assert_eq!(gateway.escrow_count(), 0);
    }

    #[tokio::test]
    async fn transaction_applies_once() {
        let gateway = MockGateway::new();
        let approver = signer(1);
        let req = deploy_request(approver.public_key(), signer(2).public_key());
        let tx = gateway.deploy_escrow(&req).await.unwrap();
        let signed = approver.sign(&tx).unwrap();
        gateway.submit_transaction(&signed).await.unwrap();
        assert!(gateway.submit_transaction(&signed).await.is_err());
        assert_eq!(gateway.escrow_count(), 1);
    }

    #[tokio::test]
    async fn reapproval_is_an_error() {
        let gateway = MockGateway::new();
        let contract_id = deployed(&gateway).await;
        gateway.update_escrow(&contract_id, |e| e.milestones[0].flags.approved = true);
        let err = gateway
            .approve_milestone(&ApproveMilestoneRequest {
                contract_id,
                milestone_index: 0,
                approver: signer(1).public_key(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[tokio::test]
    async fn injected_failure_is_consumed() {
        let gateway = MockGateway::new();
        gateway.fail_next(Operation::GetEscrow, 1);
        let contract_id = deployed(&gateway).await;
        assert!(matches!(
            gateway.get_escrow(&contract_id).await,
            Err(GatewayError::Unavailable(_))
        ));
        assert!(gateway.get_escrow(&contract_id).await.is_ok());
        assert_eq!(gateway.calls(Operation::GetEscrow), 2);
    }

    #[tokio::test]
    async fn timeout_after_apply_still_changes_the_contract() {
        let gateway = MockGateway::new();
        let contract_id = deployed(&gateway).await;
        let approver = signer(1);
        gateway.time_out_after_apply(Operation::Approve);
        let tx = gateway
            .approve_milestone(&ApproveMilestoneRequest {
                contract_id: contract_id.clone(),
                milestone_index: 0,
                approver: approver.public_key(),
            })
            .await
            .unwrap();
        let err = gateway.sign_and_submit(tx, &approver).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(gateway.escrow(&contract_id).unwrap().milestones[0].is_approved());
    }

    #[tokio::test]
    async fn missing_contract_read_is_not_found() {
        let gateway = MockGateway::new();
        let err = gateway.get_escrow("CNOPE").await.unwrap_err();
        assert!(matches!(err, GatewayError::Server { status: 404, .. }));
    }
}
