//! Container runtime availability checks.

use crate::process::{self, RunOptions, Shell};

use super::types::CheckResult;

/// `docker` must be on PATH and its daemon must answer.
pub fn check_container_runtime(host: &dyn Shell) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match process::which("docker") {
        Some(path) => results.push(CheckResult::pass_with("docker", &path)),
        None => {
            results.push(CheckResult::fail(
                "docker",
                "Not found. Install Docker Engine (docker.io or docker-ce package).",
            ));
            return results;
        }
    }

    results.push(check_daemon(host));
    results
}

fn check_daemon(host: &dyn Shell) -> CheckResult {
    let probe = host.run(
        "docker info --format '{{.ServerVersion}}'",
        &RunOptions::buffered(),
    );
    match probe {
        Ok(result) if result.success => {
            CheckResult::pass_with("docker daemon", &format!("server {}", result.stdout_trimmed()))
        }
        Ok(result) => CheckResult::fail(
            "docker daemon",
            &format!("Not reachable: {}", result.stderr_trimmed()),
        ),
        Err(e) => CheckResult::fail("docker daemon", &format!("{:#}", e)),
    }
}
