//! Show command - displays information.

use anyhow::Result;

use crate::classify::PatternTable;
use crate::config::Config;
use crate::container::{Container, ContainerState};
use crate::process::HostShell;

use super::build::PERSISTENT_CONTAINER;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration and error patterns
    Config,
    /// Show the persistent container's state
    Container,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config, patterns: &PatternTable) -> Result<()> {
    match target {
        ShowTarget::Config => {
            config.print();
            println!();
            patterns.print();
        }
        ShowTarget::Container => {
            let host = HostShell::new()?;
            let container = Container::new(PERSISTENT_CONTAINER, config.image.as_str());
            let state = match container.state(&host)? {
                ContainerState::Missing => "not created",
                ContainerState::Stopped => "stopped",
                ContainerState::Running => "running",
            };
            println!("{}: {}", container.name(), state);
        }
    }
    Ok(())
}
