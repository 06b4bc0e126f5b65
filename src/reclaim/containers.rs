//! Stopped-container reclamation.

use chrono::Utc;
use tracing::{debug, warn};

use super::{exceeds_age, ItemFailure, Policy, ReclaimSummary};
use crate::subprocess::docker::{DockerError, DockerRunner};

/// Remove containers in the `exited` or `dead` state whose finish time
/// is older than the policy threshold.
///
/// The listing call failing is fatal to the pass. Everything after it
/// is per-item: a container whose finish time cannot be read or parsed
/// is skipped, and a failed removal is recorded while the loop
/// continues. Removal is attempted at most once per container per pass.
pub async fn reclaim_containers(
    docker: &dyn DockerRunner,
    policy: Policy,
) -> Result<ReclaimSummary, DockerError> {
    let candidates = docker.list_stopped_containers().await?;
    let now = Utc::now();

    let mut summary = ReclaimSummary {
        examined: candidates.len(),
        ..Default::default()
    };

    for container in candidates {
        let finished_at = match docker.container_finished_at(&container.id).await {
            Ok(finished_at) => finished_at,
            Err(err) => {
                warn!(
                    "Failed to get finish time for container {}: {}",
                    container.id, err
                );
                summary.skipped += 1;
                continue;
            }
        };

        if !exceeds_age(now, finished_at, policy.older_than_hours) {
            debug!("Container {} is within the age threshold", container.id);
            continue;
        }

        if policy.dry_run {
            summary.would_remove.push(container.id);
            continue;
        }

        match docker.remove_container(&container.id).await {
            Ok(()) => summary.removed.push(container.id),
            Err(err) => {
                warn!("Failed to remove container {}: {}", container.id, err);
                summary.failed.push(ItemFailure {
                    id: container.id,
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(summary)
}
