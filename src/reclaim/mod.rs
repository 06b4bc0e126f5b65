//! Reclamation decision engine.
//!
//! Three structurally identical pipelines discover candidate resources
//! through the typed docker port, decide eligibility under a [`Policy`],
//! and remove what qualifies. Passes are strictly sequential: no daemon
//! call is issued before the previous one completes, and the snapshot
//! taken by a listing call is never refreshed mid-pass. A container that
//! starts referencing a resource between list and remove is an accepted
//! race; the daemon stays the only arbiter of truth.

pub mod containers;
pub mod images;
pub mod volumes;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use chrono::{DateTime, Utc};

use crate::subprocess::docker::{DockerError, DockerRunner};

/// Reclamation policy, supplied once per invocation and applied
/// uniformly to every resource class.
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    /// Compute every decision but issue no mutating call.
    pub dry_run: bool,
    /// Age threshold in hours. A resource at exactly this age is kept.
    pub older_than_hours: u32,
}

/// One failed per-item operation. Reported, never fatal to the pass.
#[derive(Debug)]
pub struct ItemFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of a single reclaim pass over one resource class.
#[derive(Debug, Default)]
pub struct ReclaimSummary {
    /// Candidates enumerated by the listing call.
    pub examined: usize,
    /// Identifiers actually removed.
    pub removed: Vec<String>,
    /// Identifiers that would have been removed without `dry_run`.
    pub would_remove: Vec<String>,
    /// Candidates skipped because a per-item read failed.
    pub skipped: usize,
    /// Per-item removal failures.
    pub failed: Vec<ItemFailure>,
    /// Daemon report from the bulk dangling-image prune (images pass only).
    pub pruned: Option<String>,
}

impl ReclaimSummary {
    /// True when the pass found nothing to act on.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.would_remove.is_empty() && self.failed.is_empty()
    }
}

/// Resource class handled by one reclaim phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Containers,
    Images,
    Volumes,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Containers => write!(f, "containers"),
            Phase::Images => write!(f, "images"),
            Phase::Volumes => write!(f, "volumes"),
        }
    }
}

/// Result of one orchestrated phase.
#[derive(Debug)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub result: Result<ReclaimSummary, DockerError>,
}

/// Run the three reclaimers in fixed order: containers first, so that
/// image and volume usage reflects their deletion, then images, then
/// volumes. A failed phase is recorded and the next phase still runs;
/// nothing is retried. Best-effort progress, not a transaction.
pub async fn reclaim_all(docker: &dyn DockerRunner, policy: Policy) -> Vec<PhaseOutcome> {
    let mut outcomes = Vec::with_capacity(3);

    outcomes.push(PhaseOutcome {
        phase: Phase::Containers,
        result: containers::reclaim_containers(docker, policy).await,
    });
    outcomes.push(PhaseOutcome {
        phase: Phase::Images,
        result: images::reclaim_images(docker, policy).await,
    });
    outcomes.push(PhaseOutcome {
        phase: Phase::Volumes,
        result: volumes::reclaim_volumes(docker, policy).await,
    });

    outcomes
}

/// Strict age test shared by the aged resource classes. Hours are
/// compared as floating point, not truncated; a resource at exactly the
/// threshold is kept.
pub(crate) fn exceeds_age(
    now: DateTime<Utc>,
    then: DateTime<Utc>,
    older_than_hours: u32,
) -> bool {
    let age_hours = (now - then).num_milliseconds() as f64 / 3_600_000.0;
    age_hours > f64::from(older_than_hours)
}
