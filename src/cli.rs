//! Command-line interface.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ethercore",
    version,
    about = "Reactive compile orchestration core for solidity workspaces"
)]
pub struct Cli {
    /// Workspace root (defaults to the current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Config file path (defaults to `<root>/ethercore.toml`)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// When to use terminal colors
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch the workspace: re-wire subscriptions on config changes and
    /// compile on save while connected to a provider
    Watch,

    /// Compile a single source file and print the outcome
    Compile {
        /// Source file to compile
        file: PathBuf,
    },
}
