//! Build environment checks (build context files, output directory).

use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::steps::{Variant, AUTO_BUILD_SCRIPT};

use super::types::CheckResult;

/// Files the chosen variant needs, plus a writable output directory.
pub fn check_build_environment(config: &Config, variant: Variant) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match variant {
        Variant::Interactive => {
            results.push(check_file(
                &config.base_dir.join(AUTO_BUILD_SCRIPT),
                "copied into the container for image assembly",
            ));
            let dockerfile = config.base_dir.join("Dockerfile");
            if dockerfile.exists() {
                results.push(CheckResult::pass("Dockerfile"));
            } else {
                results.push(CheckResult::warn(
                    "Dockerfile",
                    &format!("Not found; image '{}' must already exist", config.image),
                ));
            }
        }
        Variant::Ci => {
            results.push(check_file(
                &config.base_dir.join("Dockerfile"),
                "required to build the container image",
            ));
        }
    }

    results.push(check_writable(&config.output_dir));
    results
}

fn check_file(path: &Path, purpose: &str) -> CheckResult {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    if path.is_file() {
        CheckResult::pass(&name)
    } else {
        CheckResult::fail(&name, &format!("Missing at {} ({})", path.display(), purpose))
    }
}

fn check_writable(dir: &Path) -> CheckResult {
    let name = "output dir writable";
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(name, &format!("Cannot create {}: {}", dir.display(), e));
    }
    let probe = dir.join(".preflight-test");
    match fs::write(&probe, "test") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            CheckResult::pass_with(name, &dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("Cannot write to {}: {}", dir.display(), e)),
    }
}
