//! Configuration management for the RPi4 builder.
//!
//! Built once at startup from environment variables (a `.env` file is loaded
//! into the environment first by `main`) and passed explicitly to every
//! component. Nothing reads the environment after this point.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

use crate::error::ConfigError;

/// Default container image name.
pub const DEFAULT_IMAGE: &str = "rpi4-boot-builder";

/// Default overall limit for the CI build steps (2 hours).
pub const DEFAULT_MAX_BUILD_TIME: Duration = Duration::from_secs(7200);

/// Delays used by the retry loop and remediator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause after a remediation before the next attempt.
    pub retry_delay: Duration,
    /// How long the network remediation waits.
    pub network_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(2),
            network_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No waiting at all. For tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            retry_delay: Duration::ZERO,
            network_backoff: Duration::ZERO,
        }
    }
}

/// Builder configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the Dockerfile and auto_build.sh.
    pub base_dir: PathBuf,
    /// Host directory mounted at /output and holding the final image.
    pub output_dir: PathBuf,
    /// Container image name (without tag).
    pub image: String,
    /// Running under CI (`CI=true`).
    pub is_ci: bool,
    /// Wall-clock budget for the CI build steps.
    pub max_build_time: Duration,
    /// `GITHUB_RUN_NUMBER`, or "local".
    pub build_number: String,
    /// `GITHUB_SHA`, or "unknown".
    pub commit_sha: String,
    pub policy: RetryPolicy,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load(base_dir: &Path) -> Result<Self> {
        Self::from_lookup(base_dir, |key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(base_dir: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_ci = lookup("CI")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let max_build_time = match lookup("MAX_BUILD_TIME") {
            Some(value) => {
                let secs = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidSeconds {
                        name: "MAX_BUILD_TIME",
                        value: value.clone(),
                    })?;
                Duration::from_secs(secs)
            }
            None => DEFAULT_MAX_BUILD_TIME,
        };

        let output_dir = lookup("RPI4_OUTPUT_DIR")
            .map(|s| {
                let path = PathBuf::from(s);
                if path.is_absolute() {
                    path
                } else {
                    base_dir.join(path)
                }
            })
            .unwrap_or_else(|| base_dir.to_path_buf());

        let image = lookup("RPI4_IMAGE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_IMAGE.to_string());

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            output_dir,
            image,
            is_ci,
            max_build_time,
            build_number: lookup("GITHUB_RUN_NUMBER").unwrap_or_else(|| "local".to_string()),
            commit_sha: lookup("GITHUB_SHA").unwrap_or_else(|| "unknown".to_string()),
            policy: RetryPolicy::default(),
        })
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  BASE_DIR: {}", self.base_dir.display());
        println!("  RPI4_OUTPUT_DIR: {}", self.output_dir.display());
        println!("  RPI4_IMAGE: {}", self.image);
        println!("  CI: {}", self.is_ci);
        println!("  MAX_BUILD_TIME: {}s", self.max_build_time.as_secs());
        println!("  GITHUB_RUN_NUMBER: {}", self.build_number);
        println!("  GITHUB_SHA: {}", self.commit_sha);
        println!(
            "  Retry delay: {}s, network backoff: {}s",
            self.policy.retry_delay.as_secs(),
            self.policy.network_backoff.as_secs()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(Path::new("/work"), |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(!config.is_ci);
        assert_eq!(config.max_build_time, Duration::from_secs(7200));
        assert_eq!(config.build_number, "local");
        assert_eq!(config.commit_sha, "unknown");
        assert_eq!(config.image, DEFAULT_IMAGE);
        assert_eq!(config.output_dir, PathBuf::from("/work"));
        assert_eq!(config.policy, RetryPolicy::default());
    }

    #[test]
    fn test_ci_flag_only_true_counts() {
        assert!(config_from(&[("CI", "true")]).unwrap().is_ci);
        assert!(config_from(&[("CI", "TRUE")]).unwrap().is_ci);
        assert!(!config_from(&[("CI", "1")]).unwrap().is_ci);
        assert!(!config_from(&[("CI", "false")]).unwrap().is_ci);
    }

    #[test]
    fn test_github_values() {
        let config = config_from(&[
            ("GITHUB_RUN_NUMBER", "42"),
            ("GITHUB_SHA", "abc123"),
            ("MAX_BUILD_TIME", "600"),
        ])
        .unwrap();
        assert_eq!(config.build_number, "42");
        assert_eq!(config.commit_sha, "abc123");
        assert_eq!(config.max_build_time, Duration::from_secs(600));
    }

    #[test]
    fn test_bad_max_build_time() {
        let err = config_from(&[("MAX_BUILD_TIME", "two hours")]).unwrap_err();
        assert!(err.to_string().contains("MAX_BUILD_TIME"));
    }

    #[test]
    fn test_relative_output_dir_is_under_base() {
        let config = config_from(&[("RPI4_OUTPUT_DIR", "out")]).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/work/out"));

        let config = config_from(&[("RPI4_OUTPUT_DIR", "/srv/images")]).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/srv/images"));
    }
}
