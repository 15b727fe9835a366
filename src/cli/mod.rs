//! Command-line interface for almadeploy.
//!
//! Flag definitions live in `commands`; text and JSON rendering of plans,
//! validation results and deployment summaries lives in `output`.

mod commands;
mod output;

pub use commands::{Cli, Commands, DeployArgs, OutputFormat};
pub use output::OutputFormatter;
