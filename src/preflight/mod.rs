//! Preflight checks for the RPi4 build.
//!
//! Validates the container runtime and build context before starting.
//! Run with `rpi4-build preflight` to check everything is ready.

mod environment;
mod host_tools;
mod types;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::process::Shell;
use crate::steps::Variant;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks for `variant`.
pub fn run_preflight(host: &dyn Shell, config: &Config, variant: Variant) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking container runtime...");
    checks.extend(host_tools::check_container_runtime(host));

    println!("Checking build environment...");
    checks.extend(environment::check_build_environment(config, variant));

    println!();

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(host: &dyn Shell, config: &Config, variant: Variant) -> Result<()> {
    let report = run_preflight(host, config, variant);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
