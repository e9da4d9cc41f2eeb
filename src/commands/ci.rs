//! CI command - one-shot build in a throwaway container.
//!
//! Builds the container image, runs the steps under one wall-clock budget,
//! checks the image size and writes `build-stats.json`. Any error is caught
//! here, logged, and turned into a failed run.

use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{error, info, warn};

use crate::artifact::{self, BuildStats, STATS_FILE};
use crate::classify::PatternTable;
use crate::config::Config;
use crate::container::{self, Container, ContainerState, RunSpec};
use crate::pipeline::Pipeline;
use crate::process::{self, HostShell, Shell};
use crate::remedy::Remediator;
use crate::retry::{Deadline, StepRunner};
use crate::steps::{Variant, IMAGE_BUILD_TIMEOUT, IMAGE_FILE, OUTPUT_MOUNT};
use crate::timing::{format_elapsed, Timer};

/// Name of the per-run CI container.
pub const CI_CONTAINER: &str = "rpi4-builder-ci";

/// Log file for CI builds.
pub const LOG_FILE: &str = "build.log";

/// Container output saved during cleanup.
pub const CONTAINER_LOG_FILE: &str = "container-build.log";

/// Settle time after `docker run`.
const START_SETTLE: Duration = Duration::from_secs(5);

/// Execute the CI build. Returns whether the build succeeded.
pub fn cmd_ci(config: &Config, patterns: &PatternTable) -> Result<bool> {
    if !process::exists("docker") {
        bail!("docker not found in PATH");
    }
    let host = HostShell::new()?;
    Ok(run_ci(&host, config, patterns))
}

/// Whole CI flow against any host shell. Never returns an error.
pub fn run_ci(host: &dyn Shell, config: &Config, patterns: &PatternTable) -> bool {
    let timer = Timer::start("CI build");
    let container = Container::new(CI_CONTAINER, format!("{}:latest", config.image));
    info!("starting CI RPi4 build");

    let outcome = build(host, &container, config, patterns);
    cleanup(host, &container, config);

    match outcome {
        Ok(true) => {
            info!("build finished in {}", format_elapsed(timer.elapsed()));
            true
        }
        Ok(false) => false,
        Err(e) => {
            error!("build aborted: {:#}", e);
            false
        }
    }
}

fn build(
    host: &dyn Shell,
    container: &Container,
    config: &Config,
    patterns: &PatternTable,
) -> Result<bool> {
    remove_stale(host, container, config)?;

    info!("building container image {}", container.image());
    let built = container.build_image(host, &config.base_dir, IMAGE_BUILD_TIMEOUT)?;
    if !built.success {
        error!("image build failed: {}", built.stderr_trimmed());
        return Ok(false);
    }
    info!("container image ready");

    let spec = RunSpec {
        privileged: true,
        volumes: vec![(config.output_dir.clone(), OUTPUT_MOUNT.to_string())],
        env: vec![
            ("CI".to_string(), "true".to_string()),
            ("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()),
        ],
    };
    let started = container.create(host, &spec)?;
    if !started.success {
        error!("failed to start build container: {}", started.stderr_trimmed());
        return Ok(false);
    }
    host.pause(START_SETTLE)?;
    info!("build container ready");

    let shell = container.shell(host);
    let remediator = Remediator::new(&shell, &config.policy);
    let runner = StepRunner::new(&shell, patterns, &remediator, &config.policy)
        .with_deadline(Deadline::after(config.max_build_time));
    let report = Pipeline::new(Variant::Ci.steps()).run(&runner)?;
    if !report.succeeded() {
        if let Some(step) = report.failed_step() {
            let category = step
                .last_category
                .map(|c| c.to_string())
                .unwrap_or_else(|| "time limit".to_string());
            error!("build failed at {} ({})", step.name, category);
        }
        return Ok(false);
    }
    info!("build steps succeeded");

    let image = config.output_dir.join(IMAGE_FILE);
    info!("verifying {}", image.display());
    let size = match artifact::verify_image(&image) {
        Ok(size) => size,
        Err(e) => {
            error!("{:#}", e);
            return Ok(false);
        }
    };
    info!("image verified: {} bytes", size);
    host.checkpoint()?;

    BuildStats::new(config, size).write(&config.output_dir.join(STATS_FILE))?;
    info!("build stats written to {}", STATS_FILE);
    Ok(true)
}

/// Drop the previous run's container (and, on CI runners, unused images).
fn remove_stale(host: &dyn Shell, container: &Container, config: &Config) -> Result<()> {
    info!("removing previous CI container");
    container.remove(host)?;
    if config.is_ci {
        container::system_prune(host)?;
    }
    Ok(())
}

/// Save container logs and, on CI runners, remove the container.
fn cleanup(host: &dyn Shell, container: &Container, config: &Config) {
    info!("cleaning up");

    match container.state(host) {
        Ok(ContainerState::Missing) => {}
        Ok(_) => {
            let dest = config.output_dir.join(CONTAINER_LOG_FILE);
            if let Err(e) = container.save_logs(host, &dest) {
                warn!("could not save container logs: {:#}", e);
            }
        }
        Err(e) => warn!("could not query container: {:#}", e),
    }

    if config.is_ci {
        if let Err(e) = container.remove(host) {
            warn!("could not remove container: {:#}", e);
        }
    }
}
