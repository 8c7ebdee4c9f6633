//! Settlement failures and how a caller may recover from each.
//!
//! Every failure answers one question for the user: did anything happen?
//! [`SettlementError::recovery`] keeps "nothing happened, retry" apart from
//! "resume at a specific step" and "something happened, get help".

use std::fmt;

use forgepay_core::{ConfigError, MilestoneStatus, ProjectStatus, ValidationError};
use forgepay_escrow::GatewayError;
use forgepay_store::StoreError;
use thiserror::Error;

/// Steps of project creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStage {
    Validating,
    Deploying,
    Funding,
    Persisting,
}

impl fmt::Display for CreationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validating => "validating",
            Self::Deploying => "deploying",
            Self::Funding => "funding",
            Self::Persisting => "persisting",
        })
    }
}

/// Steps of milestone completion, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CompletionStage {
    Resolving,
    Approving,
    StatusChanging,
    Recording,
}

impl fmt::Display for CompletionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolving => "resolving",
            Self::Approving => "approving",
            Self::StatusChanging => "status change",
            Self::Recording => "recording",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// No durable state changed anywhere.
    RetrySafely,
    /// Re-invoking completion resumes at this step; confirmed steps are skipped.
    ResumeAt(CompletionStage),
    /// Ledger and store disagree; reconcile by hand before retrying.
    ContactSupport,
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("escrow {stage} failed for engagement {engagement_id}: {source}")]
    Creation {
        stage: CreationStage,
        engagement_id: String,
        /// Set when a contract was deployed before the failure.
        contract_id: Option<String>,
        #[source]
        source: GatewayError,
    },

    /// The escrow is funded but the project row was not written.
    #[error("escrow {contract_id} is funded but the project could not be saved: {source}")]
    ProjectPersistence {
        contract_id: String,
        #[source]
        source: StoreError,
    },

    /// The project row exists without its milestones.
    #[error("project {project_id} was saved but its milestones were not: {source}")]
    PartialPersistence {
        project_id: String,
        contract_id: String,
        #[source]
        source: StoreError,
    },

    #[error("milestone {milestone_id}: {stage} failed: {source}")]
    Completion {
        milestone_id: String,
        stage: CompletionStage,
        #[source]
        source: GatewayError,
    },

    /// Both contract operations succeeded; only the local write is missing.
    #[error("milestone {milestone_id} is completed on the contract but could not be recorded: {source}")]
    Recording {
        milestone_id: String,
        #[source]
        source: StoreError,
    },

    #[error("milestone {milestone_id} cannot move from {from} to {to}")]
    InvalidTransition {
        milestone_id: String,
        from: MilestoneStatus,
        to: MilestoneStatus,
    },

    #[error("project {project_id} is {status}, not active")]
    ProjectNotActive {
        project_id: String,
        status: ProjectStatus,
    },

    #[error("milestone {milestone_id}: {reason}")]
    Conflict { milestone_id: String, reason: String },

    #[error("contract index of milestone {milestone_id} could only be guessed")]
    AmbiguousMapping { milestone_id: String },

    #[error("milestone {0} already has a completion in progress")]
    InFlight(String),

    #[error("project {0} has no escrow contract")]
    MissingContract(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SettlementError {
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Validation(_)
            | Self::Config(_)
            | Self::InvalidTransition { .. }
            | Self::ProjectNotActive { .. }
            | Self::InFlight(_)
            | Self::Store(_) => Recovery::RetrySafely,
            // A funding submission that timed out may have moved money.
            Self::Creation {
                stage: CreationStage::Funding,
                source,
                ..
            } if source.is_timeout() => Recovery::ContactSupport,
            Self::Creation { .. } => Recovery::RetrySafely,
            // A refused approval confirmed nothing; a timed-out one may have applied.
            Self::Completion {
                stage: CompletionStage::Approving,
                source,
                ..
            } if !source.is_timeout() => Recovery::RetrySafely,
            Self::Completion { stage, .. } => Recovery::ResumeAt(*stage),
            Self::Recording { .. } => Recovery::ResumeAt(CompletionStage::Recording),
            Self::ProjectPersistence { .. }
            | Self::PartialPersistence { .. }
            | Self::Conflict { .. }
            | Self::AmbiguousMapping { .. }
            | Self::MissingContract(_) => Recovery::ContactSupport,
        }
    }

    /// A sentence for the person who triggered the operation.
    pub fn user_message(&self) -> String {
        match self.recovery() {
            Recovery::RetrySafely => {
                format!("Nothing was changed: {self}. It is safe to try again.")
            }
            Recovery::ResumeAt(stage) => format!(
                "Part of this operation was confirmed: {self}. \
                 Retrying resumes at the {stage} step without repeating confirmed steps."
            ),
            Recovery::ContactSupport => format!(
                "Something was changed but not fully recorded: {self}. \
                 Contact support before retrying."
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creation(stage: CreationStage, source: GatewayError) -> SettlementError {
        SettlementError::Creation {
            stage,
            engagement_id: "eng-1".into(),
            contract_id: None,
            source,
        }
    }

    #[test]
    fn validation_is_safe_to_retry() {
        let err = SettlementError::from(ValidationError::PercentageSum(90));
        assert_eq!(err.recovery(), Recovery::RetrySafely);
        assert!(err.user_message().starts_with("Nothing was changed"));
        assert!(err.user_message().contains("sum to 90"));
    }

    #[test]
    fn creation_failures_retry_unless_funding_timed_out() {
        let unavailable = || GatewayError::Unavailable("down".into());
        assert_eq!(
            creation(CreationStage::Deploying, unavailable()).recovery(),
            Recovery::RetrySafely
        );
        assert_eq!(
            creation(CreationStage::Funding, unavailable()).recovery(),
            Recovery::RetrySafely
        );
        assert_eq!(
            creation(CreationStage::Deploying, GatewayError::Timeout).recovery(),
            Recovery::RetrySafely
        );
        assert_eq!(
            creation(CreationStage::Funding, GatewayError::Timeout).recovery(),
            Recovery::ContactSupport
        );
    }

    #[test]
    fn completion_failures_resume_at_their_step() {
        let err = SettlementError::Completion {
            milestone_id: "m1".into(),
            stage: CompletionStage::StatusChanging,
            source: GatewayError::Unavailable("down".into()),
        };
        assert_eq!(
            err.recovery(),
            Recovery::ResumeAt(CompletionStage::StatusChanging)
        );
        assert!(err.user_message().contains("status change step"));
    }

    #[test]
    fn refused_approval_is_safe_to_retry() {
        let refused = SettlementError::Completion {
            milestone_id: "m1".into(),
            stage: CompletionStage::Approving,
            source: GatewayError::Unavailable("down".into()),
        };
        assert_eq!(refused.recovery(), Recovery::RetrySafely);
        assert!(refused.user_message().starts_with("Nothing was changed"));

        let timed_out = SettlementError::Completion {
            milestone_id: "m1".into(),
            stage: CompletionStage::Approving,
            source: GatewayError::Timeout,
        };
        assert_eq!(
            timed_out.recovery(),
            Recovery::ResumeAt(CompletionStage::Approving)
        );
    }

    #[test]
    fn partial_persistence_needs_support() {
        let err = SettlementError::PartialPersistence {
            project_id: "p1".into(),
            contract_id: "CABC".into(),
            source: StoreError::Other("disk full".into()),
        };
        assert_eq!(err.recovery(), Recovery::ContactSupport);
        assert!(err.user_message().contains("Contact support"));
    }

    #[test]
    fn stages_are_ordered() {
        assert!(CompletionStage::Approving < CompletionStage::StatusChanging);
        assert!(CompletionStage::StatusChanging < CompletionStage::Recording);
    }
}
