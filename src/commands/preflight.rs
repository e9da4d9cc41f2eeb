//! Preflight command - runs preflight checks.

use anyhow::Result;

use crate::config::Config;
use crate::preflight;
use crate::process::HostShell;
use crate::steps::Variant;

/// Execute the preflight command.
pub fn cmd_preflight(config: &Config, variant: Variant, strict: bool) -> Result<()> {
    let host = HostShell::new()?;
    if strict {
        preflight::run_preflight_or_fail(&host, config, variant)?;
    } else {
        let report = preflight::run_preflight(&host, config, variant);
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to fail with exit code 1.");
        }
    }
    Ok(())
}
