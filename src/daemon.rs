//! Daemon wiring - constructs the core and runs it.
//!
//! # Responsibility
//!
//! This is a **thin orchestrator**: it builds the store, workspace watcher,
//! provider, gateway, resolver, pipeline and subscription tree, spawns their
//! loops, and handles shutdown. It contains no business logic.
//!
//! ```text
//! ConfigWatcher --> SubscriptionTree --> CompilePipeline --> StateStore
//!       |                  |                   |                 |
//!       +------------------+-------------------+-----------------+
//!                       channel wiring only
//! ```

use crate::chain::node::NodeProvider;
use crate::commands::{Command, command_channel, spawn_stdin_commands};
use crate::config::{self, ConfigHandle, CoreConfig};
use crate::gateway::SolcGateway;
use crate::imports::SolImportResolver;
use crate::pipeline::{CompilePipeline, CompileTrigger};
use crate::store::{Severity, StateStore};
use crate::tree::SubscriptionTree;
use crate::workspace::WatchedWorkspace;
use crate::{debug, log};
use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Run the watch daemon until Ctrl+C.
pub fn run(config: CoreConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    runtime.block_on(run_daemon(config))
}

async fn run_daemon(config: CoreConfig) -> Result<()> {
    let store = StateStore::new();
    let handle = ConfigHandle::new(config.clone());

    let workspace = Arc::new(
        WatchedWorkspace::new(config.root.clone())
            .map_err(|error| anyhow::anyhow!("workspace watcher failed: {error}"))?,
    );
    let gateway = SolcGateway::new(handle.clone()).context("compiler gateway unavailable")?;
    let (pipeline, pipeline_handle) =
        CompilePipeline::new(SolImportResolver, gateway, store.clone());

    let commands = command_channel();
    spawn_stdin_commands(commands.clone());
    spawn_panel_listener(commands.subscribe());
    spawn_action_logger(&store);

    let config_watch =
        config::watch::spawn(config.clone(), handle.clone()).context("config watcher failed")?;
    let tree = SubscriptionTree::new(
        NodeProvider,
        workspace,
        store.clone(),
        pipeline_handle,
        commands,
        config_watch.rx.clone(),
    );

    // Shutdown signal (Ctrl+C) over a crossbeam channel; polled so the
    // runtime stays free for the actors.
    let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("failed to install shutdown handler")?;

    let pipeline_task = tokio::spawn(pipeline.run());
    let tree_task = tokio::spawn(tree.run());

    log!("watch"; "watching {} (save `ethercore.toml` to re-wire)", config.root.display());
    loop {
        if shutdown_rx.try_recv().is_ok() {
            debug!("watch"; "shutdown signal received");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Dropping the config watcher closes the config channel; the tree loop
    // exits and tears every scope down, which releases the last pipeline
    // handles.
    drop(config_watch);
    let _ = tokio::time::timeout(Duration::from_secs(2), tree_task).await;
    let _ = tokio::time::timeout(Duration::from_millis(500), pipeline_task).await;

    log!("watch"; "stopped");
    Ok(())
}

/// Acknowledge panel toggles; rendering belongs to the host shim.
fn spawn_panel_listener(mut commands: tokio::sync::broadcast::Receiver<Command>) {
    tokio::spawn(async move {
        while let Ok(command) = commands.recv().await {
            if command == Command::TogglePanel {
                log!("panel"; "toggle requested (panel is rendered by the host shim)");
            }
        }
    });
}

/// Trace every dispatch in verbose mode.
fn spawn_action_logger(store: &StateStore) {
    let mut actions = store.subscribe();
    tokio::spawn(async move {
        loop {
            match actions.recv().await {
                Ok(action) => debug!("store"; "dispatch {action:?}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

// =============================================================================
// One-shot compile
// =============================================================================

/// Compile a single file through the full pipeline and print the outcome.
pub fn compile_once(config: CoreConfig, file: &Path) -> Result<()> {
    let store = StateStore::new();
    let handle = ConfigHandle::new(config);

    let gateway = SolcGateway::new(handle).context("compiler gateway unavailable")?;
    let (pipeline, _handle) = CompilePipeline::new(SolImportResolver, gateway, store.clone());

    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read `{}`", file.display()))?;
    pipeline.process(CompileTrigger::new(file.to_path_buf(), text));

    let state = store.snapshot();
    for diagnostic in &state.errors {
        log!("error"; "{diagnostic}");
    }
    if let Some(result) = &state.compiled
        && let Some(contracts) = result.contracts()
    {
        for (file_name, in_file) in contracts {
            let names: Vec<&String> = in_file
                .as_object()
                .map(|entries| entries.keys().collect())
                .unwrap_or_default();
            for name in names {
                log!("compile"; "{file_name}: compiled contract {name}");
            }
        }
    }

    if state
        .errors
        .iter()
        .any(|diagnostic| diagnostic.severity == Severity::Error)
    {
        bail!("compilation failed");
    }
    Ok(())
}
