//! In-memory docker port for engine tests: canned daemon state plus a
//! log of every mutating call issued against it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::subprocess::docker::{
    ContainerMount, ContainerRecord, DockerError, DockerRunner, ImageRecord,
};

#[derive(Default)]
pub(crate) struct StubDocker {
    pub containers: Vec<ContainerRecord>,
    /// Finish times by container id; a missing entry simulates an
    /// unreadable `FinishedAt`.
    pub finish_times: HashMap<String, DateTime<Utc>>,
    pub images: Vec<ImageRecord>,
    pub image_refs_in_use: Vec<String>,
    pub volumes: Vec<String>,
    pub mounts: Vec<ContainerMount>,
    /// Identifiers whose removal calls fail. Use `"<dangling>"` to fail
    /// the bulk prune.
    pub fail_removals: HashSet<String>,
    /// Listing calls that fail: `list-containers`, `list-images`,
    /// `list-image-refs`, `list-volumes`, `list-mounts`.
    pub fail_listings: HashSet<&'static str>,
    pub(crate) mutations: Mutex<Vec<String>>,
}

impl StubDocker {
    /// Every mutating call issued so far, in order.
    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    fn listing(&self, which: &'static str) -> Result<(), DockerError> {
        if self.fail_listings.contains(which) {
            return Err(DockerError::CommandFailed {
                command: which.to_string(),
                code: 1,
                stderr: "Cannot connect to the Docker daemon".to_string(),
            });
        }
        Ok(())
    }

    fn mutate(&self, call: String, id: &str) -> Result<(), DockerError> {
        if self.fail_removals.contains(id) {
            return Err(DockerError::CommandFailed {
                command: call,
                code: 1,
                stderr: format!("{id} is in use"),
            });
        }
        self.mutations.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl DockerRunner for StubDocker {
    async fn ping(&self) -> Result<(), DockerError> {
        self.listing("ping")
    }

    async fn list_stopped_containers(&self) -> Result<Vec<ContainerRecord>, DockerError> {
        self.listing("list-containers")?;
        Ok(self.containers.clone())
    }

    async fn container_finished_at(&self, id: &str) -> Result<DateTime<Utc>, DockerError> {
        self.finish_times
            .get(id)
            .copied()
            .ok_or_else(|| DockerError::MalformedOutput {
                command: "inspect".to_string(),
                detail: format!("bad FinishedAt for {id}"),
            })
    }

    async fn remove_container(&self, id: &str) -> Result<(), DockerError> {
        self.mutate(format!("rm {id}"), id)
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>, DockerError> {
        self.listing("list-images")?;
        Ok(self.images.clone())
    }

    async fn list_container_image_refs(&self) -> Result<Vec<String>, DockerError> {
        self.listing("list-image-refs")?;
        Ok(self.image_refs_in_use.clone())
    }

    async fn remove_image(&self, id: &str) -> Result<(), DockerError> {
        self.mutate(format!("rmi {id}"), id)
    }

    async fn prune_dangling_images(&self) -> Result<String, DockerError> {
        self.mutate("image prune".to_string(), "<dangling>")?;
        Ok("Total reclaimed space: 0B".to_string())
    }

    async fn list_volumes(&self) -> Result<Vec<String>, DockerError> {
        self.listing("list-volumes")?;
        Ok(self.volumes.clone())
    }

    async fn list_container_mounts(&self) -> Result<Vec<ContainerMount>, DockerError> {
        self.listing("list-mounts")?;
        Ok(self.mounts.clone())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), DockerError> {
        self.mutate(format!("volume rm {name}"), name)
    }
}
