//! Unused-image reclamation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{exceeds_age, ItemFailure, Policy, ReclaimSummary};
use crate::subprocess::docker::{DockerError, DockerRunner, ImageRecord};

/// Why an image was kept, or that it was not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageDecision {
    Eligible,
    InUse,
    TooYoung,
    NoTimestamp,
}

/// An image qualifies for removal only when no known container
/// references it and it is older than the threshold; either condition
/// alone keeps it. An image with no usable creation time cannot be aged
/// and is skipped.
pub(crate) fn evaluate_image(
    image: &ImageRecord,
    used: &HashSet<String>,
    now: DateTime<Utc>,
    older_than_hours: u32,
) -> ImageDecision {
    if used.contains(&image.reference()) {
        return ImageDecision::InUse;
    }
    match image.created_at {
        None => ImageDecision::NoTimestamp,
        Some(created_at) if exceeds_age(now, created_at, older_than_hours) => {
            ImageDecision::Eligible
        }
        Some(_) => ImageDecision::TooYoung,
    }
}

/// Remove images that no container references and that are older than
/// the policy threshold, then bulk-prune dangling layers.
///
/// The used set is one snapshot of every container's image reference,
/// running or stopped, taken before the loop. Dangling layers carry no
/// `repository:tag` and cannot be evaluated per item; the daemon's own
/// prune handles them after the loop, and not at all under dry-run.
pub async fn reclaim_images(
    docker: &dyn DockerRunner,
    policy: Policy,
) -> Result<ReclaimSummary, DockerError> {
    let images = docker.list_images().await?;
    let used: HashSet<String> = docker
        .list_container_image_refs()
        .await?
        .into_iter()
        .collect();
    let now = Utc::now();

    let mut summary = ReclaimSummary {
        examined: images.len(),
        ..Default::default()
    };

    for image in images {
        let decision = evaluate_image(&image, &used, now, policy.older_than_hours);
        debug!("Image {} evaluated: {:?}", image.reference(), decision);

        match decision {
            ImageDecision::InUse | ImageDecision::TooYoung => {}
            ImageDecision::NoTimestamp => {
                warn!(
                    "Failed to parse creation time for image {}, skipping",
                    image.id
                );
                summary.skipped += 1;
            }
            ImageDecision::Eligible => {
                let label = format!("{} ({})", image.reference(), short_id(&image.id));
                if policy.dry_run {
                    summary.would_remove.push(label);
                    continue;
                }
                match docker.remove_image(&image.id).await {
                    Ok(()) => summary.removed.push(label),
                    Err(err) => {
                        warn!("Failed to remove image {}: {}", short_id(&image.id), err);
                        summary.failed.push(ItemFailure {
                            id: label,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }
    }

    if !policy.dry_run {
        match docker.prune_dangling_images().await {
            Ok(report) => summary.pruned = Some(report),
            Err(err) => {
                warn!("Failed to remove dangling images: {}", err);
                summary.failed.push(ItemFailure {
                    id: "dangling images".to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(summary)
}

/// Truncated identifier the way the docker CLI prints one.
fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
