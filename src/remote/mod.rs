//! Cloud-driven control: configuration pushes and queued commands.

pub mod commands;
pub mod config_sync;

pub use commands::{CommandContext, CommandExecutor, CommandOutcome, CommandStats};
pub use config_sync::{ConfigChanges, ConfigManager};
