//! The relational store as the settlement core sees it.

use async_trait::async_trait;
use forgepay_core::{Milestone, MilestoneStatus, Organization, Project, ProjectStatus};

use crate::StoreError;

/// Rows the orchestrator and read model need, and the only writes they perform.
///
/// Status updates are compare-and-set: they succeed only if the row still
/// holds `from`, and fail with [`StoreError::StaleStatus`] otherwise.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn get_organization(&self, id: &str) -> Result<Organization, StoreError>;

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError>;

    async fn get_project(&self, id: &str) -> Result<Project, StoreError>;

    async fn find_project_by_engagement(
        &self,
        engagement_id: &str,
    ) -> Result<Option<Project>, StoreError>;

    async fn update_project_status(
        &self,
        id: &str,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<(), StoreError>;

    /// Insert a project's milestones as one batch: all rows or none.
    async fn insert_milestones(&self, milestones: &[Milestone]) -> Result<(), StoreError>;

    async fn get_milestone(&self, id: &str) -> Result<Milestone, StoreError>;

    /// Milestones of a project ordered by `created_at`, ties broken by id.
    async fn milestones_for_project(&self, project_id: &str)
    -> Result<Vec<Milestone>, StoreError>;

    async fn update_milestone_status(
        &self,
        id: &str,
        from: MilestoneStatus,
        to: MilestoneStatus,
    ) -> Result<(), StoreError>;
}
