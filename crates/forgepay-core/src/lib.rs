pub mod account;
pub mod config;
pub mod draft;
pub mod escrow;
pub mod model;
pub mod ordering;

pub use account::{AccountId, AccountIdError};
pub use config::{ConfigError, SettlementConfig};
pub use draft::{
    LEDGER_DECIMALS, MAX_TOTAL_AMOUNT, MilestoneDraft, ProjectDraft, ValidationError,
    milestone_amount,
};
pub use escrow::{Escrow, EscrowMilestone, EscrowRoles, MilestoneFlags, Trustline};
pub use model::{
    Evidence, Milestone, MilestoneStatus, Organization, OrganizationType, ParseStatusError,
    Project, ProjectStatus, SYNTHETIC_CONTRACT_PREFIX,
};
pub use ordering::{creation_position, sort_by_creation, timestamp_key};
