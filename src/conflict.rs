//! Scheduling conflict checker
//!
//! Applies the half-open overlap test against every blocking advisory of
//! an expert. Any overlap disqualifies the candidate; the first match is
//! returned. Atomicity with the insert is the engine's job: it holds the
//! per-expert lock across check-then-insert.

use crate::interval::TimeInterval;
use crate::store::EngineStore;
use crate::Result;
use uuid::Uuid;

/// Outcome of a conflict check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictCheck {
    pub conflict: bool,
    pub conflicting_advisory_id: Option<Uuid>,
}

impl ConflictCheck {
    pub fn clear() -> Self {
        Self {
            conflict: false,
            conflicting_advisory_id: None,
        }
    }

    pub fn against(advisory_id: Uuid) -> Self {
        Self {
            conflict: true,
            conflicting_advisory_id: Some(advisory_id),
        }
    }
}

/// Check a candidate interval against the expert's blocking advisories
/// (`confirmada`, `completada`). Pending-payment and closed advisories
/// never block.
pub async fn check_conflict(
    store: &dyn EngineStore,
    expert_id: Uuid,
    candidate: &TimeInterval,
) -> Result<ConflictCheck> {
    let blocking = store.blocking_advisories_for_expert(expert_id).await?;

    for advisory in &blocking {
        if advisory.interval().overlaps(candidate) {
            return Ok(ConflictCheck::against(advisory.advisory_id));
        }
    }

    Ok(ConflictCheck::clear())
}
