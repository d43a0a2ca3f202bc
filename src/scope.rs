//! Grouped, jointly-disposable subscription handles.
//!
//! A [`Scope`] owns an ordered collection of disposable handles: teardown
//! callbacks, spawned-task aborts, owned resources (dropped on disposal),
//! and nested child scopes. Disposal recurses into children depth-first and
//! releases handles in reverse insertion order, so the most recently wired
//! subscription is always the first to go. A scope is never disposed twice,
//! and dropping an undisposed scope disposes it.

use std::any::Any;
use tokio::task::JoinHandle;

enum Handle {
    /// Callback run at disposal time.
    Teardown(Box<dyn FnOnce() + Send>),
    /// Spawned task aborted at disposal time.
    Task(JoinHandle<()>),
    /// Owned resource dropped at disposal time (e.g. a live connection).
    Resource(Box<dyn Any + Send>),
    /// Nested scope, disposed before this scope's own handles.
    Child(Scope),
}

/// An ordered collection of disposable handles, disposable as a unit.
#[derive(Default)]
pub struct Scope {
    handles: Vec<Handle>,
    disposed: bool,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback to run when this scope is disposed.
    pub fn on_dispose(&mut self, f: impl FnOnce() + Send + 'static) {
        self.handles.push(Handle::Teardown(Box::new(f)));
    }

    /// Own a spawned task; it is aborted when this scope is disposed.
    pub fn add_task(&mut self, task: JoinHandle<()>) {
        self.handles.push(Handle::Task(task));
    }

    /// Own an arbitrary resource; it is dropped when this scope is disposed.
    pub fn keep<T: Send + 'static>(&mut self, resource: T) {
        self.handles.push(Handle::Resource(Box::new(resource)));
    }

    /// Nest a child scope. The child is disposed before this scope's own
    /// handles are released.
    pub fn add_child(&mut self, child: Scope) {
        self.handles.push(Handle::Child(child));
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Dispose every handle in this scope. Children are disposed first
    /// (depth-first), then the scope's own handles in reverse insertion
    /// order. Calling this twice is a no-op.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        let handles = std::mem::take(&mut self.handles);
        let mut own = Vec::with_capacity(handles.len());
        for handle in handles.into_iter().rev() {
            match handle {
                Handle::Child(mut child) => child.dispose(),
                other => own.push(other),
            }
        }
        for handle in own {
            match handle {
                Handle::Teardown(f) => f(),
                Handle::Task(task) => task.abort(),
                Handle::Resource(resource) => drop(resource),
                Handle::Child(_) => unreachable!(),
            }
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.dispose();
    }
}

// =============================================================================
// Tests
// =============================================================================
