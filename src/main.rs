//! ethercore - reactive compile orchestration core for solidity workspaces.

#![allow(dead_code)]

mod chain;
mod cli;
mod commands;
mod config;
mod daemon;
mod exec;
mod gateway;
mod imports;
mod logger;
mod pipeline;
mod scope;
mod store;
mod tree;
mod workspace;

use anyhow::{Context, Result};
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use config::CoreConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| root.join("ethercore.toml"));
    let config = CoreConfig::load(&config_path, &root)?;

    match &cli.command {
        Commands::Watch => daemon::run(config),
        Commands::Compile { file } => daemon::compile_once(config, file),
    }
}
