//! Settlement orchestrator.
//!
//! Two state machines, each strictly sequential:
//!
//! - creation: validating → deploying → funding → persisting
//! - completion: resolving → approving → status change → recording
//!
//! Local writes always come last. A milestone is recorded as completed only
//! after the contract confirmed both the approval and the status change, and a
//! project row is written only for a deployed and funded contract.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use forgepay_core::ordering::batch_timestamps;
use forgepay_core::{
    AccountId, EscrowRoles, Milestone, MilestoneStatus, Organization, Project,
    ProjectDraft, ProjectStatus, SYNTHETIC_CONTRACT_PREFIX, SettlementConfig, ValidationError,
};
use forgepay_escrow::{
    ApproveMilestoneRequest, ChangeMilestoneStatusRequest, DeployMilestone, DeployRequest,
    EscrowGateway, FundRequest, GatewayError, SubmitOutcome, TransactionSigner,
};
use forgepay_store::{SettlementStore, StoreError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{CompletionStage, CreationStage, SettlementError};
use crate::inflight::InFlight;
use crate::mapper::{IndexResolution, MatchMethod, resolve_index};
use crate::read_model::{ReadModel, progress};

const COMPLETED_STATUS: &str = "completed";

/// A project persisted with all of its milestones.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedProject {
    pub project: Project,
    /// In creation order, which is also contract order.
    pub milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Approved, status changed and recorded in this invocation.
    Completed,
    /// Earlier invocations had already done everything; nothing was called.
    AlreadyCompleted,
    /// An earlier invocation confirmed some contract steps; this one finished
    /// from `from` onward.
    Resumed { from: CompletionStage },
    /// Development project without an escrow; recorded locally only.
    RecordedLocally,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub milestone: Milestone,
    pub contract_index: Option<u32>,
    pub mapping: Option<MatchMethod>,
    pub outcome: CompletionOutcome,
    /// Whether the project is completed after this call.
    pub project_completed: bool,
    pub progress: u8,
}

/// Ledger accounts behind a project's two parties.
struct Parties {
    contractor: AccountId,
    freelancer: AccountId,
}

pub struct Orchestrator {
    store: Arc<dyn SettlementStore>,
    gateway: Arc<dyn EscrowGateway>,
    config: SettlementConfig,
    in_flight: InFlight,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        gateway: Arc<dyn EscrowGateway>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
            in_flight: InFlight::default(),
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// A read model over the same store and gateway.
    pub fn read_model(&self) -> ReadModel {
        ReadModel::new(self.store.clone(), self.gateway.clone())
    }

    // ── Project creation ──

    /// Validate `draft`, deploy and fund its escrow, then persist the project
    /// and its milestones. `signer` must hold the contractor's wallet key.
    pub async fn create_project(
        &self,
        draft: &ProjectDraft,
        signer: &dyn TransactionSigner,
    ) -> Result<CreatedProject, SettlementError> {
        let parties = self.validate(draft, signer).await?;
        let engagement_id = Uuid::new_v4().to_string();

        let contract_id = if self.config.skip_escrow {
            let synthetic = format!("{SYNTHETIC_CONTRACT_PREFIX}{}", Uuid::new_v4());
            warn!(
                %engagement_id,
                contract_id = %synthetic,
                "escrow skipped; project will not be backed by funds"
            );
            synthetic
        } else {
            self.deploy_and_fund(draft, &engagement_id, &parties, signer)
                .await?
        };

        self.persist(draft, engagement_id, contract_id).await
    }

    async fn validate(
        &self,
        draft: &ProjectDraft,
        signer: &dyn TransactionSigner,
    ) -> Result<Parties, SettlementError> {
        self.config.validate()?;
        draft.validate()?;

        let contractor = self.active_organization(&draft.contractor_id).await?;
        let freelancer_id = draft
            .freelancer_id
            .as_deref()
            .map(str::trim)
            .ok_or(ValidationError::NoCollaborator)?;
        let freelancer = self.active_organization(freelancer_id).await?;

        let parties = Parties {
            contractor: wallet(&contractor)?,
            freelancer: wallet(&freelancer)?,
        };
        ensure_signer(&parties.contractor, signer)?;
        Ok(parties)
    }

    async fn active_organization(&self, id: &str) -> Result<Organization, SettlementError> {
        let org = match self.store.get_organization(id).await {
            Ok(org) => org,
            Err(StoreError::NotFound { .. }) => {
                return Err(ValidationError::UnknownOrganization(id.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        };
        if !org.is_active() {
            return Err(ValidationError::InactiveOrganization(id.to_string()).into());
        }
        Ok(org)
    }

    async fn deploy_and_fund(
        &self,
        draft: &ProjectDraft,
        engagement_id: &str,
        parties: &Parties,
        signer: &dyn TransactionSigner,
    ) -> Result<String, SettlementError> {
        let failed = |stage: CreationStage, contract_id: Option<&str>, source: GatewayError| {
            warn!(%engagement_id, ?contract_id, %stage, error = %source, "escrow creation failed");
            SettlementError::Creation {
                stage,
                engagement_id: engagement_id.to_string(),
                contract_id: contract_id.map(str::to_string),
                source,
            }
        };

        let deploy = DeployRequest {
            signer: parties.contractor.clone(),
            engagement_id: engagement_id.to_string(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            roles: EscrowRoles {
                approver: parties.contractor.clone(),
                service_provider: parties.freelancer.clone(),
                platform_address: self.config.platform_address.clone(),
                release_signer: parties.contractor.clone(),
                dispute_resolver: self.config.platform_address.clone(),
            },
            platform_fee: self.config.platform_fee,
            // Contract descriptions carry local titles; the mapper matches on them.
            milestones: draft
                .milestones
                .iter()
                .zip(draft.milestone_amounts())
                .map(|(m, amount)| DeployMilestone {
                    description: m.title.clone(),
                    amount,
                    receiver: parties.freelancer.clone(),
                })
                .collect(),
            trustline: self.config.trustline.clone(),
        };

        info!(%engagement_id, milestones = deploy.milestones.len(), "deploying escrow");
        let tx = self
            .gateway
            .deploy_escrow(&deploy)
            .await
            .map_err(|e| failed(CreationStage::Deploying, None, e))?;
        let contract_id = match self.gateway.sign_and_submit(tx, signer).await {
            Ok(SubmitOutcome::Deployed { contract_id, .. }) => contract_id,
            Ok(SubmitOutcome::Applied { .. }) => {
                let e = GatewayError::UnexpectedResponse(
                    "deploy submission returned no contract id".into(),
                );
                return Err(failed(CreationStage::Deploying, None, e));
            }
            Err(e) => return Err(failed(CreationStage::Deploying, None, e)),
        };
        info!(%engagement_id, %contract_id, "escrow deployed");

        let fund = FundRequest {
            contract_id: contract_id.clone(),
            signer: parties.contractor.clone(),
            amount: draft.total_amount,
        };
        info!(%contract_id, amount = %fund.amount, "funding escrow");
        let tx = self
            .gateway
            .fund_escrow(&fund)
            .await
            .map_err(|e| failed(CreationStage::Funding, Some(&contract_id), e))?;
        self.gateway
            .sign_and_submit(tx, signer)
            .await
            .map_err(|e| failed(CreationStage::Funding, Some(&contract_id), e))?;
        info!(%contract_id, "escrow funded");

        Ok(contract_id)
    }

    async fn persist(
        &self,
        draft: &ProjectDraft,
        engagement_id: String,
        contract_id: String,
    ) -> Result<CreatedProject, SettlementError> {
        // Stored timestamps carry microseconds.
        let now = Utc::now().trunc_subsecs(6);
        let project = Project {
            id: Uuid::new_v4().to_string(),
            engagement_id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            total_amount: draft.total_amount,
            expected_delivery_date: draft.expected_delivery_date,
            status: ProjectStatus::Active,
            contract_id: Some(contract_id.clone()),
            contractor_id: draft.contractor_id.clone(),
            freelancer_id: draft
                .freelancer_id
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            created_at: now,
        };

        if let Err(source) = self.store.insert_project(&project).await {
            if project.has_synthetic_contract() {
                return Err(source.into());
            }
            error!(%contract_id, error = %source, "escrow funded but project row not written");
            return Err(SettlementError::ProjectPersistence {
                contract_id,
                source,
            });
        }

        let milestones: Vec<Milestone> = draft
            .milestones
            .iter()
            .zip(batch_timestamps(now, draft.milestones.len()))
            .enumerate()
            .map(|(index, (m, created_at))| Milestone {
                id: Uuid::new_v4().to_string(),
                project_id: project.id.clone(),
                title: m.title.clone(),
                description: m.description.clone(),
                percentage: m.percentage,
                status: MilestoneStatus::Pending,
                contract_index: Some(index as u32),
                created_at,
            })
            .collect();

        if let Err(source) = self.store.insert_milestones(&milestones).await {
            error!(
                project_id = %project.id,
                %contract_id,
                error = %source,
                "project saved without milestones"
            );
            return Err(SettlementError::PartialPersistence {
                project_id: project.id,
                contract_id,
                source,
            });
        }

        info!(
            project_id = %project.id,
            %contract_id,
            milestones = milestones.len(),
            "project created"
        );
        Ok(CreatedProject {
            project,
            milestones,
        })
    }

    // ── Milestone start ──

    /// Move a milestone from pending to in progress. Local only.
    pub async fn start_milestone(&self, milestone_id: &str) -> Result<Milestone, SettlementError> {
        let mut milestone = self.store.get_milestone(milestone_id).await?;
        let project = self.store.get_project(&milestone.project_id).await?;
        ensure_active(&project)?;
        ensure_transition(&milestone, MilestoneStatus::InProgress)?;

        self.store
            .update_milestone_status(
                milestone_id,
                MilestoneStatus::Pending,
                MilestoneStatus::InProgress,
            )
            .await?;
        milestone.status = MilestoneStatus::InProgress;
        info!(%milestone_id, project_id = %project.id, "milestone started");
        Ok(milestone)
    }

    // ── Milestone completion ──

    /// Approve and complete a milestone on its contract, then record it.
    ///
    /// Safe to re-invoke after any failure: contract steps already confirmed
    /// are detected and skipped, never repeated.
    pub async fn complete_milestone(
        &self,
        milestone_id: &str,
        approver: &dyn TransactionSigner,
        provider: &dyn TransactionSigner,
    ) -> Result<CompletionReport, SettlementError> {
        let _guard = self
            .in_flight
            .try_acquire(milestone_id)
            .ok_or_else(|| SettlementError::InFlight(milestone_id.to_string()))?;

        let milestone = self.store.get_milestone(milestone_id).await?;
        let project = self.store.get_project(&milestone.project_id).await?;
        let siblings = self.store.milestones_for_project(&project.id).await?;
        let contract_id = project
            .contract_id
            .clone()
            .ok_or_else(|| SettlementError::MissingContract(project.id.clone()))?;

        if project.has_synthetic_contract() {
            return self
                .complete_without_escrow(milestone, &project, siblings)
                .await;
        }

        // Resolving
        let escrow = match self.gateway.get_escrow(&contract_id).await {
            Ok(escrow) => Some(escrow),
            Err(e) => {
                warn!(%contract_id, %milestone_id, error = %e, "contract unreadable; resolving without it");
                None
            }
        };
        let resolution = resolve_index(&milestone, &siblings, escrow.as_ref());
        if resolution.is_degraded() && self.config.strict_index_mapping {
            return Err(SettlementError::AmbiguousMapping {
                milestone_id: milestone_id.to_string(),
            });
        }
        let entry = escrow
            .as_ref()
            .and_then(|e| e.milestone(resolution.index as usize));
        let approved = entry.is_some_and(|c| c.is_approved());
        let contract_completed = entry.is_some_and(|c| c.is_completed());
        info!(
            %milestone_id,
            %contract_id,
            index = resolution.index,
            method = ?resolution.method,
            approved,
            "milestone resolved"
        );

        if milestone.status == MilestoneStatus::Completed {
            if escrow.is_some() && !approved {
                return Err(SettlementError::Conflict {
                    milestone_id: milestone_id.to_string(),
                    reason: "recorded as completed but not approved on the contract".into(),
                });
            }
            if escrow.is_none() {
                warn!(%milestone_id, "already completed locally; contract could not be re-checked");
            }
            return Ok(CompletionReport {
                progress: progress(&siblings),
                milestone,
                contract_index: Some(resolution.index),
                mapping: Some(resolution.method),
                outcome: CompletionOutcome::AlreadyCompleted,
                project_completed: project.status == ProjectStatus::Completed,
            });
        }
        ensure_active(&project)?;
        ensure_transition(&milestone, MilestoneStatus::Completed)?;
        if let Some(roles) = escrow.as_ref().and_then(|e| e.roles.as_ref()) {
            ensure_signer(&roles.approver, approver)?;
            ensure_signer(&roles.service_provider, provider)?;
        } else {
            let parties = self.parties(&project).await?;
            ensure_signer(&parties.contractor, approver)?;
            ensure_signer(&parties.freelancer, provider)?;
        }

        let from = match (approved, contract_completed) {
            (true, true) => CompletionStage::Recording,
            (true, false) => CompletionStage::StatusChanging,
            (false, _) => CompletionStage::Approving,
        };
        if from > CompletionStage::Approving {
            info!(%milestone_id, %from, "contract already approved; resuming");
        }

        if from <= CompletionStage::Approving {
            self.approve(&contract_id, milestone_id, &resolution, approver)
                .await?;
        }
        if from <= CompletionStage::StatusChanging {
            self.change_status(&contract_id, milestone_id, &resolution, provider)
                .await?;
        }

        let outcome = if from == CompletionStage::Approving {
            CompletionOutcome::Completed
        } else {
            CompletionOutcome::Resumed { from }
        };
        self.record(milestone, &project, siblings, Some(resolution), outcome)
            .await
    }

    async fn approve(
        &self,
        contract_id: &str,
        milestone_id: &str,
        resolution: &IndexResolution,
        approver: &dyn TransactionSigner,
    ) -> Result<(), SettlementError> {
        let failed = |source| step_failed(milestone_id, CompletionStage::Approving, source);
        let req = ApproveMilestoneRequest {
            contract_id: contract_id.to_string(),
            milestone_index: resolution.index,
            approver: approver.public_key(),
        };
        let tx = self.gateway.approve_milestone(&req).await.map_err(failed)?;
        self.gateway
            .sign_and_submit(tx, approver)
            .await
            .map_err(failed)?;
        info!(%contract_id, %milestone_id, index = resolution.index, "milestone approved");
        Ok(())
    }

    async fn change_status(
        &self,
        contract_id: &str,
        milestone_id: &str,
        resolution: &IndexResolution,
        provider: &dyn TransactionSigner,
    ) -> Result<(), SettlementError> {
        let failed = |source| step_failed(milestone_id, CompletionStage::StatusChanging, source);
        let req = ChangeMilestoneStatusRequest {
            contract_id: contract_id.to_string(),
            milestone_index: resolution.index,
            new_status: COMPLETED_STATUS.to_string(),
            new_evidence: None,
            service_provider: provider.public_key(),
        };
        let tx = self
            .gateway
            .change_milestone_status(&req)
            .await
            .map_err(failed)?;
        self.gateway
            .sign_and_submit(tx, provider)
            .await
            .map_err(failed)?;
        info!(%contract_id, %milestone_id, index = resolution.index, "milestone status changed on contract");
        Ok(())
    }

    async fn complete_without_escrow(
        &self,
        milestone: Milestone,
        project: &Project,
        siblings: Vec<Milestone>,
    ) -> Result<CompletionReport, SettlementError> {
        if !self.config.skip_escrow {
            return Err(SettlementError::Conflict {
                milestone_id: milestone.id,
                reason: "project has a development contract id but escrow is enabled".into(),
            });
        }
        if milestone.status == MilestoneStatus::Completed {
            return Ok(CompletionReport {
                progress: progress(&siblings),
                milestone,
                contract_index: None,
                mapping: None,
                outcome: CompletionOutcome::AlreadyCompleted,
                project_completed: project.status == ProjectStatus::Completed,
            });
        }
        ensure_active(project)?;
        ensure_transition(&milestone, MilestoneStatus::Completed)?;
        warn!(milestone_id = %milestone.id, "recording completion without an escrow contract");
        self.record(
            milestone,
            project,
            siblings,
            None,
            CompletionOutcome::RecordedLocally,
        )
        .await
    }

    /// Recording: the local write, then project completion when it was the last one.
    async fn record(
        &self,
        mut milestone: Milestone,
        project: &Project,
        mut siblings: Vec<Milestone>,
        resolution: Option<IndexResolution>,
        outcome: CompletionOutcome,
    ) -> Result<CompletionReport, SettlementError> {
        if let Err(source) = self
            .store
            .update_milestone_status(
                &milestone.id,
                MilestoneStatus::InProgress,
                MilestoneStatus::Completed,
            )
            .await
        {
            error!(
                milestone_id = %milestone.id,
                error = %source,
                "contract completed but local status not recorded"
            );
            return Err(SettlementError::Recording {
                milestone_id: milestone.id,
                source,
            });
        }
        milestone.status = MilestoneStatus::Completed;
        for sibling in siblings.iter_mut().filter(|s| s.id == milestone.id) {
            sibling.status = MilestoneStatus::Completed;
        }
        info!(milestone_id = %milestone.id, ?outcome, "milestone completed");

        let project_completed = self.complete_project_if_done(project, &siblings).await;
        Ok(CompletionReport {
            progress: progress(&siblings),
            milestone,
            contract_index: resolution.map(|r| r.index),
            mapping: resolution.map(|r| r.method),
            outcome,
            project_completed,
        })
    }

    /// Moves the project to completed once every milestone is. A failure here
    /// leaves the project active and is not an error: every milestone is
    /// already settled.
    async fn complete_project_if_done(&self, project: &Project, milestones: &[Milestone]) -> bool {
        let all_done = milestones
            .iter()
            .all(|m| m.status == MilestoneStatus::Completed);
        if !all_done || project.status != ProjectStatus::Active {
            return project.status == ProjectStatus::Completed;
        }
        match self
            .store
            .update_project_status(&project.id, ProjectStatus::Active, ProjectStatus::Completed)
            .await
        {
            Ok(()) => {
                info!(project_id = %project.id, "project completed");
                true
            }
            Err(e) => {
                warn!(project_id = %project.id, error = %e, "all milestones completed but project status not updated");
                false
            }
        }
    }

    async fn parties(&self, project: &Project) -> Result<Parties, SettlementError> {
        let contractor = self.store.get_organization(&project.contractor_id).await?;
        let freelancer = self.store.get_organization(&project.freelancer_id).await?;
        Ok(Parties {
            contractor: wallet(&contractor)?,
            freelancer: wallet(&freelancer)?,
        })
    }
}

fn wallet(org: &Organization) -> Result<AccountId, ValidationError> {
    org.wallet_address
        .clone()
        .ok_or_else(|| ValidationError::MissingWallet(org.id.clone()))
}

fn ensure_signer(expected: &AccountId, signer: &dyn TransactionSigner) -> Result<(), ValidationError> {
    let actual = signer.public_key();
    if &actual != expected {
        return Err(ValidationError::SignerMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn ensure_active(project: &Project) -> Result<(), SettlementError> {
    if project.status != ProjectStatus::Active {
        return Err(SettlementError::ProjectNotActive {
            project_id: project.id.clone(),
            status: project.status,
        });
    }
    Ok(())
}

fn ensure_transition(milestone: &Milestone, to: MilestoneStatus) -> Result<(), SettlementError> {
    if !milestone.status.can_transition_to(to) {
        return Err(SettlementError::InvalidTransition {
            milestone_id: milestone.id.clone(),
            from: milestone.status,
            to,
        });
    }
    Ok(())
}

fn step_failed(milestone_id: &str, stage: CompletionStage, source: GatewayError) -> SettlementError {
    warn!(%milestone_id, %stage, error = %source, "contract step failed; local status untouched");
    SettlementError::Completion {
        milestone_id: milestone_id.to_string(),
        stage,
        source,
    }
}
