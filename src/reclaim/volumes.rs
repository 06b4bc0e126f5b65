//! Orphaned-volume reclamation.
//!
//! Volumes expose no creation timestamp at this layer, so absence of
//! use is the sole criterion: a volume mounted by no known container is
//! removed however young it is. Callers wanting a grace period must
//! track volume creation themselves.

use std::collections::HashSet;

use tracing::warn;

use super::{ItemFailure, Policy, ReclaimSummary};
use crate::subprocess::docker::{DockerError, DockerRunner, MountKind};

/// Remove volumes that no container, running or stopped, mounts.
pub async fn reclaim_volumes(
    docker: &dyn DockerRunner,
    policy: Policy,
) -> Result<ReclaimSummary, DockerError> {
    let volumes = docker.list_volumes().await?;
    let used = used_volume_names(docker).await?;

    let mut summary = ReclaimSummary {
        examined: volumes.len(),
        ..Default::default()
    };

    for volume in volumes {
        if used.contains(&volume) {
            continue;
        }

        if policy.dry_run {
            summary.would_remove.push(volume);
            continue;
        }

        match docker.remove_volume(&volume).await {
            Ok(()) => summary.removed.push(volume),
            Err(err) => {
                warn!("Failed to remove volume {}: {}", volume, err);
                summary.failed.push(ItemFailure {
                    id: volume,
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(summary)
}

/// Names of volumes mounted by any known container. Only mounts the
/// daemon types as `volume` count; a bind mount never protects a
/// volume, whatever its path text looks like.
async fn used_volume_names(docker: &dyn DockerRunner) -> Result<HashSet<String>, DockerError> {
    Ok(docker
        .list_container_mounts()
        .await?
        .into_iter()
        .filter(|mount| mount.kind == MountKind::Volume && !mount.name.is_empty())
        .map(|mount| mount.name)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reclaim::testing::StubDocker;
    use crate::subprocess::docker::ContainerMount;

    fn volume_mount(name: &str) -> ContainerMount {
        ContainerMount {
            kind: MountKind::Volume,
            name: name.to_string(),
        }
    }

    fn live() -> Policy {
        Policy {
            dry_run: false,
            older_than_hours: 24,
        }
    }

    #[tokio::test]
    async fn unused_volumes_are_removed_without_any_age_check() {
        let docker = StubDocker {
            volumes: vec!["v1".to_string(), "v2".to_string()],
            mounts: vec![volume_mount("v1")],
            ..Default::default()
        };

        // An enormous threshold changes nothing: volumes have no age test.
        let policy = Policy {
            dry_run: false,
            older_than_hours: 1_000_000,
        };
        let summary = reclaim_volumes(&docker, policy).await.unwrap();

        assert_eq!(summary.removed, vec!["v2"]);
        assert_eq!(docker.mutations(), vec!["volume rm v2"]);
    }

    #[tokio::test]
    async fn bind_mounts_never_protect_a_volume() {
        let docker = StubDocker {
            volumes: vec!["data".to_string()],
            // A bind mount whose path mentions the volume by name.
            mounts: vec![ContainerMount {
                kind: MountKind::Bind,
                name: "data".to_string(),
            }],
            ..Default::default()
        };

        let summary = reclaim_volumes(&docker, live()).await.unwrap();

        assert_eq!(summary.removed, vec!["data"]);
    }

    #[tokio::test]
    async fn dry_run_reports_without_mutating() {
        let docker = StubDocker {
            volumes: vec!["v1".to_string()],
            ..Default::default()
        };
        let policy = Policy {
            dry_run: true,
            older_than_hours: 24,
        };

        let summary = reclaim_volumes(&docker, policy).await.unwrap();

        assert_eq!(summary.would_remove, vec!["v1"]);
        assert!(docker.mutations().is_empty());
    }

    #[tokio::test]
    async fn failed_removal_is_recorded_and_the_pass_continues() {
        let docker = StubDocker {
            volumes: vec!["v1".to_string(), "v2".to_string()],
            fail_removals: ["v1".to_string()].into(),
            ..Default::default()
        };

        let summary = reclaim_volumes(&docker, live()).await.unwrap();

        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].id, "v1");
        assert_eq!(summary.removed, vec!["v2"]);
    }

    #[tokio::test]
    async fn second_pass_over_survivors_finds_nothing() {
        let docker = StubDocker {
            volumes: vec!["v1".to_string(), "v2".to_string()],
            mounts: vec![volume_mount("v1")],
            ..Default::default()
        };
        let first = reclaim_volumes(&docker, live()).await.unwrap();
        assert_eq!(first.removed, vec!["v2"]);

        let survivors = StubDocker {
            volumes: vec!["v1".to_string()],
            mounts: vec![volume_mount("v1")],
            ..Default::default()
        };
        let second = reclaim_volumes(&survivors, live()).await.unwrap();

        assert!(second.is_noop());
        assert!(survivors.mutations().is_empty());
    }

    #[tokio::test]
    async fn listing_failure_fails_the_pass() {
        let docker = StubDocker {
            fail_listings: ["list-volumes"].into(),
            ..Default::default()
        };
        assert!(reclaim_volumes(&docker, live()).await.is_err());

        let docker = StubDocker {
            volumes: vec!["v1".to_string()],
            fail_listings: ["list-mounts"].into(),
            ..Default::default()
        };
        assert!(reclaim_volumes(&docker, live()).await.is_err());
    }
}
