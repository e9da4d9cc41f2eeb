//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Interactive build in the persistent container
//! - `ci` - One-shot CI build in a throwaway container
//! - `clean` - Remove the persistent container
//! - `show` - Display configuration or container state
//! - `preflight` - Run preflight checks

pub mod build;
pub mod ci;
pub mod clean;
mod preflight;
pub mod show;

pub use build::cmd_build;
pub use ci::cmd_ci;
pub use clean::cmd_clean;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
