use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;

use docker_reclaim::preflight;
use docker_reclaim::reclaim::{self, Phase, Policy, ReclaimSummary};
use docker_reclaim::subprocess::docker::DockerRunner;
use docker_reclaim::subprocess::SubprocessManager;

/// Reclaim disk from unused Docker resources
#[derive(Parser)]
#[command(name = "docker-reclaim", version)]
#[command(about = "Remove stopped containers, unused images, and orphaned volumes", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print actions without executing them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Remove resources older than the given number of hours
    #[arg(long, value_name = "HOURS", default_value_t = 24, global = true)]
    older_than: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove stopped containers past the age threshold
    Containers,
    /// Remove unused images past the age threshold, then prune dangling layers
    Images,
    /// Remove volumes no container mounts
    Volumes,
    /// Run every phase in order: containers, images, volumes
    All,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("docker-reclaim started with verbosity level: {}", cli.verbose);

    let policy = Policy {
        dry_run: cli.dry_run,
        older_than_hours: cli.older_than,
    };
    let subprocess = SubprocessManager::production();
    let docker = subprocess.docker();

    if let Err(err) = preflight::ensure_elevated() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
    if let Err(err) = preflight::ensure_daemon_running(&docker).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Containers => run_phase(Phase::Containers, &docker, policy).await,
        Commands::Images => run_phase(Phase::Images, &docker, policy).await,
        Commands::Volumes => run_phase(Phase::Volumes, &docker, policy).await,
        Commands::All => {
            run_all(&docker, policy).await;
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Run a single reclaim phase; a listing failure here is fatal to the
/// invocation.
async fn run_phase(
    phase: Phase,
    docker: &dyn DockerRunner,
    policy: Policy,
) -> anyhow::Result<()> {
    let summary = match phase {
        Phase::Containers => reclaim::containers::reclaim_containers(docker, policy).await,
        Phase::Images => reclaim::images::reclaim_images(docker, policy).await,
        Phase::Volumes => reclaim::volumes::reclaim_volumes(docker, policy).await,
    }
    .with_context(|| format!("failed to reclaim {phase}"))?;

    print_summary(phase, &summary);
    Ok(())
}

/// Run all three phases in order. A failed phase is reported and the
/// next one still runs; the invocation itself always succeeds.
async fn run_all(docker: &dyn DockerRunner, policy: Policy) {
    for outcome in reclaim::reclaim_all(docker, policy).await {
        println!("Reclaiming {}...", outcome.phase);
        match outcome.result {
            Ok(summary) => print_summary(outcome.phase, &summary),
            Err(err) => eprintln!("Failed to reclaim {}: {err}", outcome.phase),
        }
    }
}

fn print_summary(phase: Phase, summary: &ReclaimSummary) {
    let noun = match phase {
        Phase::Containers => "container",
        Phase::Images => "image",
        Phase::Volumes => "volume",
    };

    for id in &summary.would_remove {
        println!("[DRY RUN] Would remove {noun}: {id}");
    }
    for id in &summary.removed {
        println!("Removed {noun}: {id}");
    }
    for failure in &summary.failed {
        println!("Failed to remove {}: {}", failure.id, failure.reason);
    }
    if summary.skipped > 0 {
        println!("Skipped {} {phase} with unreadable metadata", summary.skipped);
    }
    if let Some(report) = summary.pruned.as_deref().filter(|r| !r.is_empty()) {
        println!("{report}");
    }

    if summary.is_noop() {
        println!("No {phase} eligible for removal");
    }
}
