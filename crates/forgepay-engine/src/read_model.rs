//! Project/escrow read model: the local project and milestones combined with
//! a live read of the escrow contract. Performs no writes.

use std::sync::Arc;

use forgepay_core::{Escrow, Milestone, MilestoneStatus, Project, sort_by_creation};
use forgepay_escrow::EscrowGateway;
use forgepay_store::SettlementStore;
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::SettlementError;
use crate::mapper::resolve_index;

/// First milestone in progress, else the first still pending.
///
/// `milestones` must already be in creation order.
pub fn current_milestone(milestones: &[Milestone]) -> Option<&Milestone> {
    milestones
        .iter()
        .find(|m| m.status == MilestoneStatus::InProgress)
        .or_else(|| {
            milestones
                .iter()
                .find(|m| m.status == MilestoneStatus::Pending)
        })
}

/// Percentage of milestones completed, rounded half up. Zero when there are none.
pub fn progress(milestones: &[Milestone]) -> u8 {
    completed_percent(milestones.iter().map(|m| m.status))
}

fn completed_percent(statuses: impl Iterator<Item = MilestoneStatus>) -> u8 {
    let (completed, total) = statuses.fold((0usize, 0usize), |(done, total), s| {
        (done + usize::from(s == MilestoneStatus::Completed), total + 1)
    });
    if total == 0 {
        return 0;
    }
    ((200 * completed + total) / (2 * total)) as u8
}

#[derive(Debug, Clone, PartialEq)]
pub struct MilestoneView {
    pub milestone: Milestone,
    pub amount: Decimal,
    /// Contract-side `flags.approved`; `None` when the contract was not read.
    pub contract_approved: Option<bool>,
    pub contract_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectView {
    pub project: Project,
    /// In creation order.
    pub milestones: Vec<MilestoneView>,
    pub escrow: Option<Escrow>,
}

impl ProjectView {
    pub fn current_milestone(&self) -> Option<&MilestoneView> {
        let first = |status: MilestoneStatus| {
            self.milestones
                .iter()
                .find(|v| v.milestone.status == status)
        };
        first(MilestoneStatus::InProgress).or_else(|| first(MilestoneStatus::Pending))
    }

    pub fn progress(&self) -> u8 {
        completed_percent(self.milestones.iter().map(|v| v.milestone.status))
    }
}

pub struct ReadModel {
    store: Arc<dyn SettlementStore>,
    gateway: Arc<dyn EscrowGateway>,
}

impl ReadModel {
    pub fn new(store: Arc<dyn SettlementStore>, gateway: Arc<dyn EscrowGateway>) -> Self {
        Self { store, gateway }
    }

    /// Assemble the view of one project. A failed contract read degrades the
    /// view to local data only.
    pub async fn project_view(&self, project_id: &str) -> Result<ProjectView, SettlementError> {
        let project = self.store.get_project(project_id).await?;
        let mut milestones = self.store.milestones_for_project(project_id).await?;
        sort_by_creation(&mut milestones);

        let escrow = match project.contract_id.as_deref() {
            Some(_) if project.has_synthetic_contract() => None,
            Some(contract_id) => match self.gateway.get_escrow(contract_id).await {
                Ok(escrow) => Some(escrow),
                Err(e) => {
                    warn!(%contract_id, error = %e, "escrow read failed; showing local state only");
                    None
                }
            },
            None => None,
        };

        let views = milestones
            .iter()
            .map(|m| {
                let entry = escrow.as_ref().and_then(|e| {
                    let res = resolve_index(m, &milestones, Some(e));
                    (!res.is_degraded())
                        .then(|| e.milestone(res.index as usize))
                        .flatten()
                });
                MilestoneView {
                    milestone: m.clone(),
                    amount: m.amount(project.total_amount),
                    contract_approved: entry.map(|c| c.is_approved()),
                    contract_status: entry.and_then(|c| c.status.clone()),
                }
            })
            .collect();

        Ok(ProjectView {
            project,
            milestones: views,
            escrow,
        })
    }
}
