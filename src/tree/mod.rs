//! Subscription lifecycle manager.
//!
//! Keeps exactly the right set of live event subscriptions active as a pure
//! function of current configuration, with correct nesting:
//!
//! ```text
//! network-event scope      ⇔ execution == network
//! ├── compile-trigger scope ⇔ network scope exists
//! └── save-hook scope       ⇔ network scope exists && compile_on_save
//! ```
//!
//! Reconciliations are totally ordered: the reconciler consumes a watch
//! channel of configurations and runs each reconciliation to completion
//! before awaiting the next change, so the initial value and later changes
//! flow through the identical path. A scope whose condition became false is
//! disposed (most specific first) before any new scope is created.

mod events;

use crate::chain::{ChainProvider, Connection, Endpoint, EventClass, Transport};
use crate::commands::Command;
use crate::config::CoreConfig;
use crate::pipeline::{CompileTrigger, PipelineHandle};
use crate::scope::Scope;
use crate::store::{Action, Diagnostic, StateStore};
use crate::workspace::{SurfaceEvent, Workspace};
use crate::{debug, log};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Which scopes are currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStatus {
    pub network: bool,
    pub save_hooks: bool,
    pub compile_command: bool,
}

pub struct SubscriptionTree<P: ChainProvider, W: Workspace> {
    provider: P,
    workspace: Arc<W>,
    store: StateStore,
    pipeline: PipelineHandle,
    commands: broadcast::Sender<Command>,
    config_rx: watch::Receiver<CoreConfig>,

    network: Option<Scope>,
    save_hooks: Option<Scope>,
    compile_command: Option<Scope>,
    /// Endpoint the live network scope was built against.
    endpoint: Option<Endpoint>,
}

impl<P: ChainProvider, W: Workspace> SubscriptionTree<P, W> {
    pub fn new(
        provider: P,
        workspace: Arc<W>,
        store: StateStore,
        pipeline: PipelineHandle,
        commands: broadcast::Sender<Command>,
        config_rx: watch::Receiver<CoreConfig>,
    ) -> Self {
        Self {
            provider,
            workspace,
            store,
            pipeline,
            commands,
            config_rx,
            network: None,
            save_hooks: None,
            compile_command: None,
            endpoint: None,
        }
    }

    /// Reconcile against the current configuration, then against every
    /// change, until the configuration source goes away.
    pub async fn run(mut self) {
        loop {
            let config = self.config_rx.borrow_and_update().clone();
            self.reconcile(&config);
            if self.config_rx.changed().await.is_err() {
                break;
            }
        }
        self.teardown();
    }

    /// One total reconciliation pass. Runs to completion before the caller
    /// can begin another, which serializes re-entrant configuration
    /// changes.
    pub fn reconcile(&mut self, config: &CoreConfig) {
        let want_network = config.wants_network();
        let endpoint = want_network.then(|| Endpoint::select(&config.provider));
        let rebuild_network = self.network.is_some() && self.endpoint != endpoint;
        let want_saves = want_network && config.compile.on_save;
        let want_command = want_network;

        // Teardown pass, most specific first.
        if self.save_hooks.is_some() && (!want_saves || rebuild_network) {
            self.dispose_save_hooks();
        }
        if self.compile_command.is_some() && (!want_command || rebuild_network) {
            self.dispose_compile_command();
        }
        if rebuild_network {
            self.dispose_network();
        }

        // Establish pass, parent first.
        if want_network && self.network.is_none() {
            let endpoint = endpoint.expect("endpoint exists when network is wanted");
            match self.establish_network(&endpoint) {
                Ok(scope) => {
                    self.network = Some(scope);
                    self.endpoint = Some(endpoint);
                }
                Err(error) => {
                    // Reported, non-fatal; scopes stay absent and the tree
                    // stays consistent.
                    log!("tree"; "provider connection failed: {error}");
                    self.store.dispatch(Action::SetErrors(vec![Diagnostic::error(
                        format!("could not connect to provider: {error}"),
                    )]));
                    return;
                }
            }
        }

        if self.network.is_some() {
            if want_command && self.compile_command.is_none() {
                self.compile_command = Some(self.build_compile_command_scope());
            }
            if want_saves && self.save_hooks.is_none() {
                self.save_hooks = Some(self.build_save_scope());
            }
        }

        debug!("tree"; "reconciled: {:?}", self.status());
    }

    /// Dispose all scopes, most specific first. Idempotent.
    pub fn teardown(&mut self) {
        self.dispose_save_hooks();
        self.dispose_compile_command();
        self.dispose_network();
    }

    pub fn status(&self) -> TreeStatus {
        TreeStatus {
            network: self.network.is_some(),
            save_hooks: self.save_hooks.is_some(),
            compile_command: self.compile_command.is_some(),
        }
    }

    fn dispose_save_hooks(&mut self) {
        if let Some(mut scope) = self.save_hooks.take() {
            debug!("tree"; "disposing save-hook scope");
            scope.dispose();
        }
    }

    fn dispose_compile_command(&mut self) {
        if let Some(mut scope) = self.compile_command.take() {
            debug!("tree"; "disposing compile-trigger scope");
            scope.dispose();
        }
    }

    fn dispose_network(&mut self) {
        if let Some(mut scope) = self.network.take() {
            debug!("tree"; "disposing network-event scope");
            scope.dispose();
        }
        self.endpoint = None;
    }

    // -------------------------------------------------------------------------
    // Scope construction
    // -------------------------------------------------------------------------

    /// Connect to the provider and, on a streaming transport, open the three
    /// independent event subscriptions.
    fn establish_network(&self, endpoint: &Endpoint) -> Result<Scope, crate::chain::ProviderError> {
        let mut connection = self.provider.connect(endpoint)?;
        log!("chain"; "connected to {}", endpoint.url);

        let mut streams = Vec::new();
        if connection.transport() == Transport::WebSocket {
            debug!("chain"; "provider is streaming, creating subscriptions");
            for class in EventClass::all() {
                // Subscriptions are independent units of failure: one class
                // failing to subscribe leaves the others running.
                match connection.subscribe(class) {
                    Ok(stream) => streams.push((class, stream)),
                    Err(error) => {
                        log!("chain"; "{} subscription failed: {error}", class.label());
                    }
                }
            }
        }

        let mut scope = Scope::new();
        scope.keep(connection);
        for (class, stream) in streams {
            let store = self.store.clone();
            scope.add_task(tokio::spawn(events::pump(class, stream, store)));
        }
        Ok(scope)
    }

    /// Listen for the explicit compile command; on command, submit one
    /// trigger per currently open surface.
    fn build_compile_command_scope(&self) -> Scope {
        let mut rx = self.commands.subscribe();
        let workspace = Arc::clone(&self.workspace);
        let pipeline = self.pipeline.clone();

        let mut scope = Scope::new();
        scope.add_task(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Command::CompileNow) => {
                        for surface in workspace.open_surfaces() {
                            pipeline.submit(CompileTrigger::from_surface(&surface));
                        }
                    }
                    // The panel lives in the presentation layer.
                    Ok(Command::TogglePanel) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
        scope
    }

    /// Hook every currently open surface, and every surface opened while the
    /// scope is live. Each surface's hook is its own disposal unit: closing
    /// that surface disposes only its unit.
    fn build_save_scope(&self) -> Scope {
        let units: Units = Arc::new(Mutex::new(FxHashMap::default()));

        for surface in self.workspace.open_surfaces() {
            attach_hook(&self.workspace, &units, &surface.path);
        }

        let mut rx = self.workspace.events();
        let workspace = Arc::clone(&self.workspace);
        let pipeline = self.pipeline.clone();
        let task_units = Arc::clone(&units);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SurfaceEvent::Opened(surface)) => {
                        attach_hook(&workspace, &task_units, &surface.path);
                    }
                    Ok(SurfaceEvent::Saved(surface)) => {
                        let hooked = task_units.lock().contains_key(&surface.path);
                        if hooked {
                            pipeline.submit(CompileTrigger::from_surface(&surface));
                        }
                    }
                    Ok(SurfaceEvent::Closed(path)) => {
                        if let Some(mut unit) = task_units.lock().remove(&path) {
                            unit.dispose();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log!("tree"; "save-hook scope lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut scope = Scope::new();
        scope.keep(SaveHooks { units });
        scope.add_task(task);
        scope
    }
}

// =============================================================================
// Save-hook units
// =============================================================================

type Units = Arc<Mutex<FxHashMap<PathBuf, Scope>>>;

/// Attach a save hook for one surface unless one is already attached
/// (no double-subscribing).
fn attach_hook<W: Workspace>(workspace: &Arc<W>, units: &Units, path: &Path) {
    let mut units = units.lock();
    if units.contains_key(path) {
        return;
    }
    let mut unit = Scope::new();
    unit.keep(workspace.attach_save_hook(path));
    units.insert(path.to_path_buf(), unit);
}

/// Owns the per-surface units; disposing the save-hook scope drains them,
/// detaching every hook attached while the scope was live.
struct SaveHooks {
    units: Units,
}

impl Drop for SaveHooks {
    fn drop(&mut self) {
        for (_, mut unit) in self.units.lock().drain() {
            unit.dispose();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
