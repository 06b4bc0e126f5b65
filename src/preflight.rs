//! Preconditions checked before any reclaimer runs: the caller must
//! hold elevated privilege on the host, and the daemon must answer a
//! liveness probe. The engine never runs without both.

use thiserror::Error;

use crate::subprocess::docker::{DockerError, DockerRunner};

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("this command must be run with elevated privileges ({hint})")]
    NotElevated { hint: &'static str },

    #[error("the Docker daemon is not responding; is the Docker service running?")]
    DaemonUnavailable(#[source] DockerError),

    #[error("unsupported operating system: {0}")]
    UnsupportedPlatform(&'static str),
}

/// Verify the effective user can manage daemon resources.
#[cfg(unix)]
pub fn ensure_elevated() -> Result<(), PreflightError> {
    if nix::unistd::geteuid().is_root() {
        return Ok(());
    }
    let hint = if cfg!(target_os = "macos") {
        "run with sudo on macOS"
    } else {
        "run with sudo"
    };
    Err(PreflightError::NotElevated { hint })
}

#[cfg(windows)]
pub fn ensure_elevated() -> Result<(), PreflightError> {
    // `net session` succeeds only in an elevated shell.
    let status = std::process::Command::new("net")
        .arg("session")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => Ok(()),
        _ => Err(PreflightError::NotElevated {
            hint: "run from an Administrator shell",
        }),
    }
}

#[cfg(not(any(unix, windows)))]
pub fn ensure_elevated() -> Result<(), PreflightError> {
    Err(PreflightError::UnsupportedPlatform(std::env::consts::OS))
}

/// Probe daemon liveness through the port.
pub async fn ensure_daemon_running(docker: &dyn DockerRunner) -> Result<(), PreflightError> {
    docker
        .ping()
        .await
        .map_err(PreflightError::DaemonUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reclaim::testing::StubDocker;

    #[tokio::test]
    async fn unreachable_daemon_is_a_precondition_failure() {
        let docker = StubDocker {
            fail_listings: ["ping"].into(),
            ..Default::default()
        };

        let err = ensure_daemon_running(&docker).await.unwrap_err();
        assert!(matches!(err, PreflightError::DaemonUnavailable(_)));
        assert!(err.to_string().contains("not responding"));
    }

    #[tokio::test]
    async fn responsive_daemon_passes() {
        let docker = StubDocker::default();
        assert!(ensure_daemon_running(&docker).await.is_ok());
    }
}
