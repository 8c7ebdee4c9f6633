//! Shared fixtures for engine tests: an in-memory DuckDB store behind a
//! fault-injecting wrapper, the mock gateway, and two funded parties.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use forgepay_core::{
    AccountId, Milestone, MilestoneDraft, MilestoneStatus, Organization, OrganizationType, Project,
    ProjectDraft, ProjectStatus, SettlementConfig, Trustline,
};
use forgepay_escrow::{KeypairSigner, MockGateway, TESTNET_PASSPHRASE, TransactionSigner};
use forgepay_store::{DuckStore, SettlementStore, StoreError};
use rust_decimal::Decimal;

use crate::orchestrator::{CreatedProject, Orchestrator};
use crate::read_model::ReadModel;

/// One-shot failures, consumed by the next matching call.
#[derive(Default)]
pub(crate) struct Faults {
    pub project_insert: AtomicBool,
    pub milestone_insert: AtomicBool,
    pub milestone_update: AtomicU32,
    pub project_update: AtomicBool,
}

fn injected(what: &str) -> StoreError {
    StoreError::Other(format!("injected {what} failure"))
}

pub(crate) struct FailingStore {
    inner: Arc<DuckStore>,
    pub faults: Faults,
}

#[async_trait]
impl SettlementStore for FailingStore {
    async fn get_organization(&self, id: &str) -> Result<Organization, StoreError> {
        self.inner.get_organization(id).await
    }

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        if self.faults.project_insert.swap(false, Ordering::SeqCst) {
            return Err(injected("project insert"));
        }
        self.inner.insert_project(project).await
    }

    async fn get_project(&self, id: &str) -> Result<Project, StoreError> {
        self.inner.get_project(id).await
    }

    async fn find_project_by_engagement(
        &self,
        engagement_id: &str,
    ) -> Result<Option<Project>, StoreError> {
        self.inner.find_project_by_engagement(engagement_id).await
    }

    async fn update_project_status(
        &self,
        id: &str,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<(), StoreError> {
        if self.faults.project_update.swap(false, Ordering::SeqCst) {
            return Err(injected("project update"));
        }
        self.inner.update_project_status(id, from, to).await
    }

    async fn insert_milestones(&self, milestones: &[Milestone]) -> Result<(), StoreError> {
        if self.faults.milestone_insert.swap(false, Ordering::SeqCst) {
            return Err(injected("milestone insert"));
        }
        self.inner.insert_milestones(milestones).await
    }

    async fn get_milestone(&self, id: &str) -> Result<Milestone, StoreError> {
        self.inner.get_milestone(id).await
    }

    async fn milestones_for_project(&self, project_id: &str) -> Result<Vec<Milestone>, StoreError> {
        self.inner.milestones_for_project(project_id).await
    }

    async fn update_milestone_status(
        &self,
        id: &str,
        from: MilestoneStatus,
        to: MilestoneStatus,
    ) -> Result<(), StoreError> {
        let fail = self
            .faults
            .milestone_update
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(injected("milestone update"));
        }
        self.inner.update_milestone_status(id, from, to).await
    }
}

pub(crate) struct Fixture {
    pub store: Arc<DuckStore>,
    pub faulty: Arc<FailingStore>,
    pub gateway: Arc<MockGateway>,
    pub config: SettlementConfig,
    pub orchestrator: Orchestrator,
    pub contractor: KeypairSigner,
    pub freelancer: KeypairSigner,
    pub contractor_id: String,
    pub freelancer_id: String,
}

pub(crate) fn base_config() -> SettlementConfig {
    SettlementConfig::new(
        AccountId::from_public_key([9u8; 32]),
        Trustline {
            address: AccountId::from_public_key([10u8; 32]),
            decimals: Some(10_000_000),
        },
    )
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(|c| c)
    }

    pub fn with_config(configure: impl FnOnce(SettlementConfig) -> SettlementConfig) -> Self {
        let store = Arc::new(DuckStore::open().unwrap());
        let contractor = KeypairSigner::from_seed([1u8; 32], TESTNET_PASSPHRASE);
        let freelancer = KeypairSigner::from_seed([2u8; 32], TESTNET_PASSPHRASE);

        let contractor_org = Organization::new("Acme Ltd", OrganizationType::Requester)
            .with_wallet(contractor.public_key());
        let freelancer_org = Organization::new("Jo Doe Studio", OrganizationType::Provider)
            .with_wallet(freelancer.public_key());
        store.insert_organization(&contractor_org).unwrap();
        store.insert_organization(&freelancer_org).unwrap();

        let faulty = Arc::new(FailingStore {
            inner: store.clone(),
            faults: Faults::default(),
        });
        let gateway = Arc::new(MockGateway::new());
        let config = configure(base_config());
        let orchestrator = Orchestrator::new(faulty.clone(), gateway.clone(), config.clone());

        Self {
            store,
            faulty,
            gateway,
            config,
            orchestrator,
            contractor,
            freelancer,
            contractor_id: contractor_org.id,
            freelancer_id: freelancer_org.id,
        }
    }

    /// Another orchestrator over the same store and gateway.
    pub fn orchestrator_with(&self, config: SettlementConfig) -> Orchestrator {
        Orchestrator::new(self.faulty.clone(), self.gateway.clone(), config)
    }

    pub fn read_model(&self) -> ReadModel {
        self.orchestrator.read_model()
    }

    /// A $1000 draft with one milestone per percentage.
    pub fn draft(&self, percentages: &[u8]) -> ProjectDraft {
        ProjectDraft {
            title: "Marketing site".into(),
            description: "Landing pages and blog".into(),
            total_amount: Decimal::new(1000, 0),
            expected_delivery_date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
            contractor_id: self.contractor_id.clone(),
            freelancer_id: Some(self.freelancer_id.clone()),
            milestones: percentages
                .iter()
                .enumerate()
                .map(|(i, &percentage)| MilestoneDraft {
                    title: format!("Milestone {}", i + 1),
                    description: String::new(),
                    percentage,
                })
                .collect(),
        }
    }

    pub async fn create(&self, percentages: &[u8]) -> CreatedProject {
        self.orchestrator
            .create_project(&self.draft(percentages), &self.contractor)
            .await
            .unwrap()
    }

    /// Create a project and start its milestone at `index`.
    pub async fn started(&self, percentages: &[u8], index: usize) -> (CreatedProject, String) {
        let created = self.create(percentages).await;
        let id = created.milestones[index].id.clone();
        self.orchestrator.start_milestone(&id).await.unwrap();
        (created, id)
    }
}
