//! Shared application state with typed action dispatch.
//!
//! The [`StateStore`] is the single mutable resource the core components
//! share. It is only ever written through [`StateStore::dispatch`]: every
//! dispatch is a full-value replace or append applied by the reducer, then
//! published on an action stream that observers (the presentation layer)
//! consume in dispatch order, unbatched.
//!
//! The `Action` enum and its serialized field shapes are the wire contract
//! the presentation layer depends on.

mod types;

pub use types::{
    CompileResult, Diagnostic, Severity, SourceEntry, SourceLocation, SourceMap, SyncStatus,
};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Buffered actions an observer may lag behind before it starts missing
/// dispatches.
const ACTION_BUFFER: usize = 256;

// =============================================================================
// Actions
// =============================================================================

/// A typed state update. Serialized form uses the presentation layer's
/// action-type tags (`SET_COMPILING`, `ADD_INTERFACE`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    SetCompiling(bool),
    SetCompiled(Option<CompileResult>),
    SetErrors(Vec<Diagnostic>),
    SetEvents(Vec<Value>),
    #[serde(rename_all = "camelCase")]
    AddInterface {
        contract_name: String,
        interface: Value,
    },
    AddPendingTransaction(Value),
    SetGasLimit(u64),
    SetSyncStatus(SyncStatus),
    SetSyncing(bool),
}

// =============================================================================
// State
// =============================================================================

/// The slice of shared state the core writes. Persists for the process
/// lifetime; reset only by explicit dispatch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AppState {
    pub compiling: bool,
    pub compiled: Option<CompileResult>,
    pub interfaces: BTreeMap<String, Value>,
    pub errors: Vec<Diagnostic>,
    pub events: Vec<Value>,
    pub pending_transactions: Vec<Value>,
    pub gas_limit: u64,
    pub sync_status: Option<SyncStatus>,
    pub syncing: bool,
}

fn reduce(state: &mut AppState, action: &Action) {
    match action {
        Action::SetCompiling(compiling) => state.compiling = *compiling,
        Action::SetCompiled(compiled) => {
            // Interfaces are derived from the artifact; clearing the artifact
            // must not leave stale interfaces visible as current.
            if compiled.is_none() {
                state.interfaces.clear();
            }
            state.compiled = compiled.clone();
        }
        Action::SetErrors(errors) => state.errors = errors.clone(),
        Action::SetEvents(events) => state.events = events.clone(),
        Action::AddInterface {
            contract_name,
            interface,
        } => {
            state
                .interfaces
                .insert(contract_name.clone(), interface.clone());
        }
        Action::AddPendingTransaction(tx) => state.pending_transactions.push(tx.clone()),
        Action::SetGasLimit(limit) => state.gas_limit = *limit,
        Action::SetSyncStatus(status) => state.sync_status = Some(status.clone()),
        Action::SetSyncing(syncing) => state.syncing = *syncing,
    }
}

// =============================================================================
// Store
// =============================================================================

struct Inner {
    state: Mutex<AppState>,
    actions: broadcast::Sender<Action>,
}

/// Shared, ordered-update store. Cloning yields another handle to the same
/// store; it is passed explicitly to every component at construction.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl StateStore {
    pub fn new() -> Self {
        let (actions, _) = broadcast::channel(ACTION_BUFFER);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(AppState::default()),
                actions,
            }),
        }
    }

    /// Apply an action to the state and publish it to observers. Observers
    /// see actions in dispatch order, immediately.
    pub fn dispatch(&self, action: Action) {
        {
            let mut state = self.inner.state.lock();
            reduce(&mut state, &action);
        }
        let _ = self.inner.actions.send(action);
    }

    /// Current state, by value.
    pub fn snapshot(&self) -> AppState {
        self.inner.state.lock().clone()
    }

    /// Subscribe to the action stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.inner.actions.subscribe()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
