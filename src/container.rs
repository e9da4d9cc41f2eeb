//! Docker CLI adapter.
//!
//! All container runtime calls are plain `docker ...` command strings run
//! through a [`Shell`]. State queries use `docker inspect` and the only text
//! parsing of docker output lives in [`parse_inspect_state`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};

use crate::process::{shell_quote, ExecutionResult, RunOptions, Shell};

/// Where a container currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Missing,
    Stopped,
    Running,
}

/// Options for `docker run`.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub privileged: bool,
    /// (host path, container path)
    pub volumes: Vec<(PathBuf, String)>,
    pub env: Vec<(String, String)>,
}

/// A named container created from `image`.
#[derive(Debug, Clone)]
pub struct Container {
    name: String,
    image: String,
}

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn state(&self, host: &dyn Shell) -> Result<ContainerState> {
        let cmd = format!("docker inspect --format '{{{{.State.Running}}}}' {}", self.name);
        let result = host.run(&cmd, &RunOptions::buffered())?;
        parse_inspect_state(&self.name, &result)
    }

    pub fn exists(&self, host: &dyn Shell) -> Result<bool> {
        Ok(self.state(host)? != ContainerState::Missing)
    }

    pub fn is_running(&self, host: &dyn Shell) -> Result<bool> {
        Ok(self.state(host)? == ContainerState::Running)
    }

    /// `docker run -d ... sleep infinity`, leaving the container idle for exec.
    pub fn create(&self, host: &dyn Shell, spec: &RunSpec) -> Result<ExecutionResult> {
        host.run(&self.create_command(spec), &RunOptions::buffered())
    }

    fn create_command(&self, spec: &RunSpec) -> String {
        let mut parts = vec![format!("docker run -d --name {}", self.name)];
        if spec.privileged {
            parts.push("--privileged".to_string());
        }
        for (host_path, mount) in &spec.volumes {
            let volume = format!("{}:{}", host_path.display(), mount);
            parts.push(format!("-v {}", shell_quote(&volume)));
        }
        for (key, value) in &spec.env {
            parts.push(format!("-e {}", shell_quote(&format!("{}={}", key, value))));
        }
        parts.push(self.image.clone());
        parts.push("sleep infinity".to_string());
        parts.join(" ")
    }

    pub fn start(&self, host: &dyn Shell) -> Result<ExecutionResult> {
        host.run(&format!("docker start {}", self.name), &RunOptions::buffered())
    }

    /// `docker rm -f`. Succeeds quietly if the container is already gone.
    pub fn remove(&self, host: &dyn Shell) -> Result<ExecutionResult> {
        host.run(&format!("docker rm -f {}", self.name), &RunOptions::buffered())
    }

    pub fn copy_in(&self, host: &dyn Shell, src: &Path, dest: &str) -> Result<ExecutionResult> {
        let cmd = format!(
            "docker cp {} {}:{}",
            shell_quote(&src.to_string_lossy()),
            self.name,
            dest
        );
        host.run(&cmd, &RunOptions::buffered())
    }

    /// Write the container's log to `dest` on the host.
    pub fn save_logs(&self, host: &dyn Shell, dest: &Path) -> Result<ExecutionResult> {
        let cmd = format!(
            "docker logs {} > {} 2>&1",
            self.name,
            shell_quote(&dest.to_string_lossy())
        );
        host.run(&cmd, &RunOptions::buffered())
    }

    /// Build this container's image from `context`.
    pub fn build_image(
        &self,
        host: &dyn Shell,
        context: &Path,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let cmd = format!(
            "docker build -t {} {}",
            self.image,
            shell_quote(&context.to_string_lossy())
        );
        host.run(&cmd, &RunOptions::buffered().with_timeout(timeout))
    }

    /// A shell whose commands run inside this container.
    pub fn shell<'a>(&self, host: &'a dyn Shell) -> ContainerShell<'a> {
        ContainerShell {
            host,
            name: self.name.clone(),
        }
    }
}

/// Drop stopped containers, dangling images and build cache.
pub fn system_prune(host: &dyn Shell) -> Result<ExecutionResult> {
    host.run("docker system prune -f", &RunOptions::buffered())
}

/// Map `docker inspect --format '{{.State.Running}}'` output to a state.
pub fn parse_inspect_state(name: &str, result: &ExecutionResult) -> Result<ContainerState> {
    if !result.success {
        let stderr = result.stderr_trimmed();
        if stderr.contains("No such object") || stderr.contains("No such container") {
            return Ok(ContainerState::Missing);
        }
        bail!("docker inspect {} failed: {}", name, stderr);
    }
    match result.stdout_trimmed() {
        "true" => Ok(ContainerState::Running),
        "false" => Ok(ContainerState::Stopped),
        other => bail!("unexpected docker inspect output for {}: '{}'", name, other),
    }
}

/// Runs each command as `docker exec <name> bash -c '<command>'` on the host.
pub struct ContainerShell<'a> {
    host: &'a dyn Shell,
    name: String,
}

impl ContainerShell<'_> {
    pub fn exec_command(&self, command: &str) -> String {
        format!("docker exec {} bash -c {}", self.name, shell_quote(command))
    }
}

impl Shell for ContainerShell<'_> {
    fn run(&self, command: &str, opts: &RunOptions) -> Result<ExecutionResult> {
        self.host.run(&self.exec_command(command), opts)
    }

    fn pause(&self, delay: Duration) -> Result<()> {
        self.host.pause(delay)
    }

    fn checkpoint(&self) -> Result<()> {
        self.host.checkpoint()
    }
}
