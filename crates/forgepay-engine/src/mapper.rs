//! Milestone index mapping.
//!
//! Completion addresses a contract milestone by its position in the
//! contract's milestone array. Local rows and contract entries share no key,
//! so the position is resolved from, in order of trust:
//!
//! 1. the index persisted at creation, when the contract entry there still
//!    carries the milestone's title (or the contract cannot be read);
//! 2. the contract entry whose description equals the milestone's title;
//! 3. the milestone's position in local creation order;
//! 4. index 0, flagged as degraded.

use forgepay_core::{Escrow, Milestone, creation_position};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    Persisted,
    Description,
    CreationOrder,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexResolution {
    pub index: u32,
    pub method: MatchMethod,
}

impl IndexResolution {
    fn new(index: usize, method: MatchMethod) -> Self {
        Self {
            index: index as u32,
            method,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.method == MatchMethod::Degraded
    }
}

/// Resolve `target`'s index in `escrow`'s milestone array.
///
/// `siblings` are all local milestones of the target's project, in any order.
/// `escrow` is `None` when the contract could not be read.
pub fn resolve_index(
    target: &Milestone,
    siblings: &[Milestone],
    escrow: Option<&Escrow>,
) -> IndexResolution {
    if let Some(index) = target.contract_index {
        match escrow {
            None => return IndexResolution::new(index as usize, MatchMethod::Persisted),
            Some(escrow) => match escrow.milestone(index as usize) {
                Some(entry) if entry.description == target.title => {
                    return IndexResolution::new(index as usize, MatchMethod::Persisted);
                }
                _ => warn!(
                    milestone_id = %target.id,
                    index,
                    "persisted contract index no longer matches the contract"
                ),
            },
        }
    }

    if let Some(escrow) = escrow {
        if let Some(index) = escrow
            .milestones
            .iter()
            .position(|entry| entry.description == target.title)
        {
            return IndexResolution::new(index, MatchMethod::Description);
        }
    }

    let contract_len = escrow.map(|e| e.milestones.len());
    match creation_position(siblings, &target.id) {
        Some(index) if contract_len.is_none_or(|len| index < len) => {
            IndexResolution::new(index, MatchMethod::CreationOrder)
        }
        _ => {
            warn!(
                milestone_id = %target.id,
                title = %target.title,
                "no contract milestone matches; defaulting to index 0"
            );
            IndexResolution::new(0, MatchMethod::Degraded)
        }
    }
}
