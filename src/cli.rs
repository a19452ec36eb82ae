use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "chatsync",
    about = "Conversation synchronization engine driven by replay scripts",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Path to config file (default: $CHATSYNC_CONFIG, ./chatsync.toml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Replay script to run when no subcommand is given
    pub script: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Replay a script against the in-memory backend and print the result
    Replay { script: PathBuf },
    /// Print the effective configuration
    Config,
}

impl Cli {
    pub fn resolved_command(&self) -> Option<Command> {
        self.command.clone().or_else(|| {
            self.script
                .clone()
                .map(|script| Command::Replay { script })
        })
    }
}
