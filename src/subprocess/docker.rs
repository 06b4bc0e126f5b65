use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::builder::ProcessCommandBuilder;
use super::error::ProcessError;
use super::runner::{ProcessOutput, ProcessRunner};

/// A stopped container as reported by `docker ps`.
#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub id: String,
    pub state: String,
}

/// A tagged image as reported by `docker images`.
///
/// `created_at` is `None` when the daemon printed a creation timestamp
/// this build cannot parse; callers decide what to do with such records.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: String,
    pub repository: String,
    pub tag: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl ImageRecord {
    /// Reference key used to match container image references, e.g. `app:latest`.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Volume,
    Bind,
    Other,
}

/// One entry from a container's mount table. `name` is empty for mounts
/// the daemon does not name (bind and tmpfs mounts).
#[derive(Debug, Clone)]
pub struct ContainerMount {
    pub kind: MountKind,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DockerError {
    #[error("docker {command} exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("unexpected output from docker {command}: {detail}")]
    MalformedOutput { command: String, detail: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Typed query/mutate port over the container daemon.
///
/// Listing calls map the daemon's tabular output into records at this
/// boundary, so the reclaim logic never touches raw text. Mutating calls
/// are force-removals; none of them is ever retried by the engine.
#[async_trait]
pub trait DockerRunner: Send + Sync {
    /// Liveness probe (`docker info`).
    async fn ping(&self) -> Result<(), DockerError>;

    /// Containers in the `exited` or `dead` state.
    async fn list_stopped_containers(&self) -> Result<Vec<ContainerRecord>, DockerError>;

    /// The instant the container last finished running.
    async fn container_finished_at(&self, id: &str) -> Result<DateTime<Utc>, DockerError>;

    /// Force-remove a container together with its anonymous volumes.
    async fn remove_container(&self, id: &str) -> Result<(), DockerError>;

    async fn list_images(&self) -> Result<Vec<ImageRecord>, DockerError>;

    /// Image references of every known container, running or stopped.
    async fn list_container_image_refs(&self) -> Result<Vec<String>, DockerError>;

    async fn remove_image(&self, id: &str) -> Result<(), DockerError>;

    /// Bulk-remove dangling layers, returning the daemon's report text.
    async fn prune_dangling_images(&self) -> Result<String, DockerError>;

    async fn list_volumes(&self) -> Result<Vec<String>, DockerError>;

    /// Mount entries of every known container, running or stopped.
    async fn list_container_mounts(&self) -> Result<Vec<ContainerMount>, DockerError>;

    async fn remove_volume(&self, name: &str) -> Result<(), DockerError>;
}

/// Production implementation backed by the `docker` CLI.
pub struct DockerCli {
    runner: Arc<dyn ProcessRunner>,
}

/// Check that a docker command completed successfully, surfacing stderr
/// for non-zero exit codes.
#[inline]
fn check_command_success(command: &str, output: &ProcessOutput) -> Result<(), DockerError> {
    if output.status.success() {
        Ok(())
    } else {
        Err(DockerError::CommandFailed {
            command: command.to_string(),
            code: output.status.code().unwrap_or(1),
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// Parse one `docker ps` line in `ID<TAB>State` format.
#[inline]
fn parse_container_line(line: &str) -> Option<ContainerRecord> {
    let (id, state) = line.split_once('\t')?;
    if id.is_empty() {
        return None;
    }
    Some(ContainerRecord {
        id: id.to_string(),
        state: state.to_string(),
    })
}

/// Parse one `docker images` line in `ID<TAB>Repository<TAB>Tag<TAB>CreatedAt`
/// format. A line with fewer columns is malformed; a timestamp that does
/// not parse yields `created_at: None`.
fn parse_image_line(line: &str) -> Result<ImageRecord, String> {
    let mut columns = line.splitn(4, '\t');
    match (
        columns.next(),
        columns.next(),
        columns.next(),
        columns.next(),
    ) {
        (Some(id), Some(repository), Some(tag), Some(created)) if !id.is_empty() => {
            Ok(ImageRecord {
                id: id.to_string(),
                repository: repository.to_string(),
                tag: tag.to_string(),
                created_at: parse_image_timestamp(created),
            })
        }
        _ => Err(format!(
            "expected `id<TAB>repository<TAB>tag<TAB>created`, got {line:?}"
        )),
    }
}

/// Parse the `{{.CreatedAt}}` column of `docker images`.
///
/// The daemon prints e.g. `2024-03-01 10:15:42 +0000 UTC`; the trailing
/// zone name repeats the numeric offset and is dropped before parsing.
fn parse_image_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    let without_zone_name = match trimmed.rsplit_once(' ') {
        Some((head, zone)) if !zone.is_empty() && zone.chars().all(|c| c.is_ascii_alphabetic()) => {
            head
        }
        _ => trimmed,
    };
    DateTime::parse_from_str(without_zone_name, "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an RFC 3339 `{{.State.FinishedAt}}` value from `docker inspect`.
#[inline]
fn parse_finish_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value.trim()).map(|dt| dt.with_timezone(&Utc))
}

/// Parse one `Type<TAB>Name` mount line rendered by the inspect template.
/// Unnamed mounts keep an empty name rather than being dropped.
fn parse_mount_line(line: &str) -> Option<ContainerMount> {
    let (kind, name) = match line.split_once('\t') {
        Some((kind, name)) => (kind, name),
        None => (line, ""),
    };
    let kind = match kind.trim() {
        "" => return None,
        "volume" => MountKind::Volume,
        "bind" => MountKind::Bind,
        _ => MountKind::Other,
    };
    Some(ContainerMount {
        kind,
        name: name.trim().to_string(),
    })
}

fn non_empty_lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().filter(|line| !line.trim().is_empty())
}

impl DockerCli {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    async fn docker(&self, args: &[&str]) -> Result<ProcessOutput, DockerError> {
        let output = self
            .runner
            .run(ProcessCommandBuilder::new("docker").args(args).build())
            .await?;
        check_command_success(args.first().copied().unwrap_or("docker"), &output)?;
        Ok(output)
    }
}

#[async_trait]
impl DockerRunner for DockerCli {
    async fn ping(&self) -> Result<(), DockerError> {
        self.docker(&["info"]).await.map(|_| ())
    }

    async fn list_stopped_containers(&self) -> Result<Vec<ContainerRecord>, DockerError> {
        let output = self
            .docker(&[
                "ps",
                "-a",
                "--filter",
                "status=exited",
                "--filter",
                "status=dead",
                "--format",
                "{{.ID}}\t{{.State}}",
            ])
            .await?;

        non_empty_lines(&output.stdout)
            .map(|line| {
                parse_container_line(line).ok_or_else(|| DockerError::MalformedOutput {
                    command: "ps".to_string(),
                    detail: format!("expected `id<TAB>state`, got {line:?}"),
                })
            })
            .collect()
    }

    async fn container_finished_at(&self, id: &str) -> Result<DateTime<Utc>, DockerError> {
        let output = self
            .docker(&["inspect", "-f", "{{.State.FinishedAt}}", id])
            .await?;

        let value = output.stdout.trim();
        parse_finish_timestamp(value).map_err(|err| DockerError::MalformedOutput {
            command: "inspect".to_string(),
            detail: format!("bad FinishedAt {value:?}: {err}"),
        })
    }

    async fn remove_container(&self, id: &str) -> Result<(), DockerError> {
        // -v takes the container's anonymous volumes with it.
        self.docker(&["rm", "-f", "-v", id]).await.map(|_| ())
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>, DockerError> {
        let output = self
            .docker(&[
                "images",
                "--format",
                "{{.ID}}\t{{.Repository}}\t{{.Tag}}\t{{.CreatedAt}}",
            ])
            .await?;

        non_empty_lines(&output.stdout)
            .map(|line| {
                parse_image_line(line).map_err(|detail| DockerError::MalformedOutput {
                    command: "images".to_string(),
                    detail,
                })
            })
            .collect()
    }

    async fn list_container_image_refs(&self) -> Result<Vec<String>, DockerError> {
        let output = self.docker(&["ps", "-a", "--format", "{{.Image}}"]).await?;
        Ok(non_empty_lines(&output.stdout)
            .map(str::to_string)
            .collect())
    }

    async fn remove_image(&self, id: &str) -> Result<(), DockerError> {
        self.docker(&["rmi", "-f", id]).await.map(|_| ())
    }

    async fn prune_dangling_images(&self) -> Result<String, DockerError> {
        let output = self.docker(&["image", "prune", "-f"]).await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn list_volumes(&self) -> Result<Vec<String>, DockerError> {
        let output = self
            .docker(&["volume", "ls", "--format", "{{.Name}}"])
            .await?;
        Ok(non_empty_lines(&output.stdout)
            .map(str::to_string)
            .collect())
    }

    async fn list_container_mounts(&self) -> Result<Vec<ContainerMount>, DockerError> {
        let ids: Vec<String> = {
            let output = self.docker(&["ps", "-aq"]).await?;
            non_empty_lines(&output.stdout)
                .map(str::to_string)
                .collect()
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // One inspect over all containers; the template renders one
        // `Type<TAB>Name` line per mount.
        let mut args = vec![
            "inspect",
            "-f",
            "{{range .Mounts}}{{.Type}}\t{{.Name}}\n{{end}}",
        ];
        args.extend(ids.iter().map(String::as_str));
        let output = self.docker(&args).await?;

        Ok(non_empty_lines(&output.stdout)
            .filter_map(parse_mount_line)
            .collect())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), DockerError> {
        self.docker(&["volume", "rm", "-f", name]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_container_line() {
        let record = parse_container_line("a1b2c3d4\texited").unwrap();
        assert_eq!(record.id, "a1b2c3d4");
        assert_eq!(record.state, "exited");
    }

    #[test]
    fn rejects_container_line_without_tab() {
        assert!(parse_container_line("a1b2c3d4 exited").is_none());
        assert!(parse_container_line("\texited").is_none());
    }

    #[test]
    fn parses_image_line() {
        let record =
            parse_image_line("sha123\tnginx\tlatest\t2024-03-01 10:15:42 +0000 UTC").unwrap();
        assert_eq!(record.id, "sha123");
        assert_eq!(record.reference(), "nginx:latest");
        assert_eq!(
            record.created_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 42).unwrap())
        );
    }

    #[test]
    fn image_line_with_missing_columns_is_malformed() {
        assert!(parse_image_line("sha123\tnginx\tlatest").is_err());
        assert!(parse_image_line("sha123").is_err());
    }

    #[test]
    fn unparseable_image_timestamp_yields_none() {
        let record = parse_image_line("sha123\tnginx\tlatest\tyesterday").unwrap();
        assert!(record.created_at.is_none());
    }

    #[test]
    fn image_timestamp_honors_offset() {
        let parsed = parse_image_timestamp("2024-03-01 10:15:42 -0500 EST").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 15, 15, 42).unwrap());
    }

    #[test]
    fn parses_finish_timestamp() {
        let parsed = parse_finish_timestamp("2024-03-01T10:15:42.123456789Z").unwrap();
        assert_eq!(parsed.timestamp(), 1709288142);
        // Never-started containers report the zero time, which still parses.
        assert!(parse_finish_timestamp("0001-01-01T00:00:00Z").is_ok());
        assert!(parse_finish_timestamp("not a time").is_err());
    }

    #[test]
    fn parses_mount_lines() {
        let volume = parse_mount_line("volume\tpgdata").unwrap();
        assert_eq!(volume.kind, MountKind::Volume);
        assert_eq!(volume.name, "pgdata");

        let bind = parse_mount_line("bind\t").unwrap();
        assert_eq!(bind.kind, MountKind::Bind);
        assert!(bind.name.is_empty());

        let tmpfs = parse_mount_line("tmpfs\t").unwrap();
        assert_eq!(tmpfs.kind, MountKind::Other);

        assert!(parse_mount_line("").is_none());
    }
}
