//! Clean command - removes the persistent build container.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::container::Container;
use crate::process::{HostShell, Shell};

use super::build::PERSISTENT_CONTAINER;

/// Execute the clean command.
pub fn cmd_clean(config: &Config) -> Result<()> {
    let host = HostShell::new()?;
    remove_persistent(&host, config)
}

/// Force-remove the persistent container and everything built inside it.
pub fn remove_persistent(host: &dyn Shell, config: &Config) -> Result<()> {
    let container = Container::new(PERSISTENT_CONTAINER, config.image.as_str());
    if !container.exists(host)? {
        println!("Container {} does not exist.", container.name());
        return Ok(());
    }
    println!("Removing container {} (build trees inside are lost)...", container.name());
    let result = container.remove(host)?;
    if !result.success {
        bail!("docker rm failed: {}", result.stderr_trimmed());
    }
    println!("Container removed.");
    Ok(())
}
