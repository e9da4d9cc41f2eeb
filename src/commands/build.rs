//! Build command - interactive build in the persistent container.
//!
//! The container survives between runs so a failed or interrupted build
//! resumes with the kernel and Buildroot trees it already has.

use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{error, info, warn};

use crate::artifact;
use crate::classify::PatternTable;
use crate::config::Config;
use crate::container::{Container, ContainerState, RunSpec};
use crate::error::is_interrupted;
use crate::pipeline::Pipeline;
use crate::process::{self, HostShell, RunOptions, Shell};
use crate::remedy::Remediator;
use crate::retry::StepRunner;
use crate::steps::{self, Variant, AUTO_BUILD_SCRIPT, BUILD_ROOT, IMAGE_FILE, OUTPUT_MOUNT};

/// Name of the long-lived build container.
pub const PERSISTENT_CONTAINER: &str = "rpi4-builder-persistent";

/// Log file for interactive builds.
pub const LOG_FILE: &str = "build_progress.log";

/// Settle time between starting the container and probing it.
const READY_SETTLE: Duration = Duration::from_secs(2);

/// Options for the build command.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Remove the container afterwards instead of keeping it.
    pub force_remove: bool,
}

/// Execute the build command. Returns whether the image was produced.
pub fn cmd_build(config: &Config, patterns: &PatternTable, options: BuildOptions) -> Result<bool> {
    if !process::exists("docker") {
        bail!("docker not found in PATH. Run 'rpi4-build preflight' for details.");
    }
    let host = HostShell::new()?;
    run_interactive(&host, config, patterns, options)
}

/// Whole interactive flow against any host shell.
pub fn run_interactive(
    host: &dyn Shell,
    config: &Config,
    patterns: &PatternTable,
    options: BuildOptions,
) -> Result<bool> {
    info!("starting RPi4 build (persistent container mode)");
    let container = Container::new(PERSISTENT_CONTAINER, config.image.as_str());

    let outcome = run_full_build(host, &container, config, patterns);
    cleanup(host, &container, options.force_remove);

    match outcome {
        Ok(true) => {
            info!("all build steps completed");
            Ok(true)
        }
        Ok(false) => {
            error!("build failed");
            Ok(false)
        }
        Err(e) if is_interrupted(&e) => {
            warn!("interrupted by user");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn run_full_build(
    host: &dyn Shell,
    container: &Container,
    config: &Config,
    patterns: &PatternTable,
) -> Result<bool> {
    if !ensure_container(host, container, config)? {
        return Ok(false);
    }

    let script = config.base_dir.join(AUTO_BUILD_SCRIPT);
    let copied = container.copy_in(host, &script, &format!("{}/", BUILD_ROOT))?;
    if !copied.success {
        warn!("could not copy {}: {}", AUTO_BUILD_SCRIPT, copied.stderr_trimmed());
    }

    let shell = container.shell(host);
    let remediator = Remediator::new(&shell, &config.policy);
    let runner = StepRunner::new(&shell, patterns, &remediator, &config.policy);
    let report = Pipeline::new(Variant::Interactive.steps()).run(&runner)?;
    if !report.succeeded() {
        return Ok(false);
    }

    shell.run(&steps::copy_out_command(), &RunOptions::buffered())?;
    publish_image(config);
    // Ctrl-C pressed while hashing.
    host.checkpoint()?;
    Ok(true)
}

/// Reuse, start or create the persistent container, then probe it.
fn ensure_container(host: &dyn Shell, container: &Container, config: &Config) -> Result<bool> {
    match container.state(host)? {
        ContainerState::Running => {
            info!("container {} already running", container.name());
        }
        ContainerState::Stopped => {
            info!("starting existing container {}", container.name());
            let result = container.start(host)?;
            if !result.success {
                error!("failed to start container: {}", result.stderr_trimmed());
                return Ok(false);
            }
        }
        ContainerState::Missing => {
            info!("creating container {}", container.name());
            let spec = RunSpec {
                privileged: true,
                volumes: vec![(config.output_dir.clone(), OUTPUT_MOUNT.to_string())],
                env: Vec::new(),
            };
            let result = container.create(host, &spec)?;
            if !result.success {
                error!("failed to create container: {}", result.stderr_trimmed());
                return Ok(false);
            }
        }
    }

    host.pause(READY_SETTLE)?;
    let probe = container
        .shell(host)
        .run("echo 'Container Ready'", &RunOptions::buffered())?;
    if probe.success {
        info!("container ready");
        Ok(true)
    } else {
        error!("container not ready: {}", probe.stderr_trimmed());
        Ok(false)
    }
}

/// Checksum the copied image if the output directory holds it.
fn publish_image(config: &Config) {
    let image = config.output_dir.join(IMAGE_FILE);
    if !image.exists() {
        warn!("{} not found in {}", IMAGE_FILE, config.output_dir.display());
        return;
    }
    match artifact::write_checksum(&image) {
        Ok(sidecar) => info!("image ready: {} ({})", image.display(), sidecar.display()),
        Err(e) => warn!("could not checksum {}: {:#}", image.display(), e),
    }
}

fn cleanup(host: &dyn Shell, container: &Container, force_remove: bool) {
    if !force_remove {
        info!("keeping container {} for the next build", container.name());
        return;
    }
    warn!("removing container {}", container.name());
    match container.remove(host) {
        Ok(result) if !result.success => {
            warn!("could not remove container: {}", result.stderr_trimmed())
        }
        Ok(_) => {}
        Err(e) => warn!("could not remove container: {:#}", e),
    }
}
