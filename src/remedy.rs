//! Automatic fixes for classified build failures.
//!
//! Each category maps to a fixed [`Remedy`]. Remedy commands run inside the
//! build container and are fire-and-forget: a fix that itself fails is
//! logged, but the step is still retried.

use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::classify::ErrorCategory;
use crate::config::RetryPolicy;
use crate::process::{RunOptions, Shell};
use crate::steps::BUILD_ROOT;

/// Marker Buildroot and the kernel print for missing host prerequisites.
const MISSING_PREREQ: &str = "You must install";

/// Tool paths Buildroot names, and the Debian package providing them.
const KNOWN_TOOLS: &[(&str, &str)] = &[("/usr/bin/file", "file")];

/// Installed when a prerequisite is missing but not named.
const FALLBACK_TOOLCHAIN: &str = "build-essential";

/// What to do about a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remedy {
    /// Run these commands in the container, then retry.
    Run(Vec<String>),
    /// Wait for the network backoff, then retry.
    Backoff,
    /// Nothing helps; do not retry.
    GiveUp,
}

/// Applies category-specific fixes through a shell (normally the container).
pub struct Remediator<'a> {
    shell: &'a dyn Shell,
    policy: &'a RetryPolicy,
}

impl<'a> Remediator<'a> {
    pub fn new(shell: &'a dyn Shell, policy: &'a RetryPolicy) -> Self {
        Self { shell, policy }
    }

    /// Pick the fix for `category`, looking at the failure text where needed.
    pub fn plan(category: ErrorCategory, failure_text: &str) -> Remedy {
        match category {
            ErrorCategory::Memory => Remedy::Run(vec![
                "sync && echo 3 > /proc/sys/vm/drop_caches".to_string(),
                "swapoff -a && swapon -a".to_string(),
            ]),
            ErrorCategory::Disk => Remedy::Run(vec![
                "find /tmp -type f -atime +1 -delete".to_string(),
                "apt-get clean".to_string(),
            ]),
            ErrorCategory::Network => Remedy::Backoff,
            ErrorCategory::Permission => Remedy::Run(vec![format!("chmod -R 755 {}", BUILD_ROOT)]),
            ErrorCategory::Compile => Remedy::Run(vec![compile_fix(failure_text)]),
            ErrorCategory::Docker | ErrorCategory::Unknown => Remedy::GiveUp,
        }
    }

    /// Apply the fix for `category`, spending at most `limit` on each fix
    /// command and on the backoff. Returns true if the step is worth
    /// retrying.
    pub fn remediate(
        &self,
        category: ErrorCategory,
        failure_text: &str,
        limit: Option<Duration>,
    ) -> Result<bool> {
        let remedy = Self::plan(category, failure_text);
        if remedy != Remedy::GiveUp {
            warn!("attempting automatic fix for {} error", category);
        }
        match remedy {
            Remedy::Run(commands) => {
                let opts = RunOptions {
                    stream: false,
                    timeout: limit,
                };
                for cmd in &commands {
                    let result = self.shell.run(cmd, &opts)?;
                    if !result.success {
                        // Not fed back into the retry decision.
                        warn!("fix command failed ({}): {}", cmd, result.stderr_trimmed());
                    }
                }
                Ok(true)
            }
            Remedy::Backoff => {
                let backoff = match limit {
                    Some(limit) => self.policy.network_backoff.min(limit),
                    None => self.policy.network_backoff,
                };
                self.shell.pause(backoff)?;
                Ok(true)
            }
            Remedy::GiveUp => Ok(false),
        }
    }
}

/// Package named in a "You must install ..." message, if any.
pub fn missing_package(failure_text: &str) -> Option<String> {
    if !failure_text.contains(MISSING_PREREQ) {
        return None;
    }
    if let Some((_, package)) = KNOWN_TOOLS
        .iter()
        .find(|(path, _)| failure_text.contains(path))
    {
        return Some(package.to_string());
    }
    // Buildroot: "You must install 'which' on your build machine"
    let quoted = failure_text
        .split(&format!("{} '", MISSING_PREREQ))
        .nth(1)?
        .split('\'')
        .next()?;
    let is_package_name = !quoted.is_empty()
        && quoted
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.' | '_'));
    is_package_name.then(|| quoted.to_string())
}

fn compile_fix(failure_text: &str) -> String {
    if let Some(package) = missing_package(failure_text) {
        format!("apt-get update && apt-get install -y {}", package)
    } else if failure_text.contains(MISSING_PREREQ) {
        format!("apt-get update && apt-get install -y {}", FALLBACK_TOOLCHAIN)
    } else {
        format!("cd {}/linux && make clean", BUILD_ROOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(remedy: Remedy) -> Vec<String> {
        match remedy {
            Remedy::Run(cmds) => cmds,
            other => panic!("expected commands, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_drops_caches_and_cycles_swap() {
        let cmds = commands(Remediator::plan(ErrorCategory::Memory, ""));
        assert_eq!(cmds.len(), 2);
        assert!(cmds[0].contains("drop_caches"));
        assert!(cmds[1].contains("swapoff -a && swapon -a"));
    }

    #[test]
    fn test_disk_cleans_tmp_and_apt() {
        let cmds = commands(Remediator::plan(ErrorCategory::Disk, ""));
        assert_eq!(cmds, vec!["find /tmp -type f -atime +1 -delete", "apt-get clean"]);
    }

    #[test]
    fn test_permission_resets_build_tree() {
        let cmds = commands(Remediator::plan(ErrorCategory::Permission, ""));
        assert_eq!(cmds, vec!["chmod -R 755 /rpi-boot"]);
    }

    #[test]
    fn test_network_backs_off() {
        assert_eq!(Remediator::plan(ErrorCategory::Network, ""), Remedy::Backoff);
    }

    #[test]
    fn test_docker_and_unknown_give_up() {
        assert_eq!(Remediator::plan(ErrorCategory::Docker, ""), Remedy::GiveUp);
        assert_eq!(Remediator::plan(ErrorCategory::Unknown, ""), Remedy::GiveUp);
    }

    #[test]
    fn test_compile_installs_known_tool() {
        let text = "You must install /usr/bin/file on your build machine";
        let cmds = commands(Remediator::plan(ErrorCategory::Compile, text));
        assert_eq!(cmds, vec!["apt-get update && apt-get install -y file"]);
    }

    #[test]
    fn test_compile_installs_quoted_tool() {
        let text = "You must install 'rsync' on your build machine\nmake: *** Error 1";
        let cmds = commands(Remediator::plan(ErrorCategory::Compile, text));
        assert_eq!(cmds, vec!["apt-get update && apt-get install -y rsync"]);
    }

    #[test]
    fn test_compile_generic_prereq_installs_toolchain() {
        let text = "You must install the following before building: a C++ compiler";
        let cmds = commands(Remediator::plan(ErrorCategory::Compile, text));
        assert_eq!(cmds, vec!["apt-get update && apt-get install -y build-essential"]);
    }

    #[test]
    fn test_compile_otherwise_cleans_kernel_tree() {
        let text = "drivers/gpu/foo.c:10: error: unknown type name";
        let cmds = commands(Remediator::plan(ErrorCategory::Compile, text));
        assert_eq!(cmds, vec!["cd /rpi-boot/linux && make clean"]);
    }

    #[test]
    fn test_missing_package_ignores_unrelated_text() {
        assert_eq!(missing_package("/usr/bin/file: not found"), None);
        assert_eq!(missing_package("You must install 'a b' first"), None);
    }
}
