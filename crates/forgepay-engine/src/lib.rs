//! Settlement engine: drives escrow contracts and the relational store through
//! project creation and milestone completion, and assembles the combined view.

pub mod error;
mod inflight;
pub mod mapper;
pub mod orchestrator;
pub mod read_model;

#[cfg(test)]
mod testkit;

pub use error::{CompletionStage, CreationStage, Recovery, SettlementError};
pub use mapper::{IndexResolution, MatchMethod, resolve_index};
pub use orchestrator::{CompletionOutcome, CompletionReport, CreatedProject, Orchestrator};
pub use read_model::{MilestoneView, ProjectView, ReadModel, current_milestone, progress};
