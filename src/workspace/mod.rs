//! Editor-surface boundary.
//!
//! A [`Workspace`] stands in for the host editor: it enumerates the
//! currently open editable surfaces, streams open/save/close events, and
//! hands out per-surface save-hook guards. A hook guard is owned by whoever
//! attached it; dropping the guard detaches that one surface's hook without
//! touching any other.

mod watched;

pub use watched::WatchedWorkspace;

use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// An open editable surface: its file path and current text.
#[derive(Debug, Clone)]
pub struct Surface {
    pub path: PathBuf,
    pub text: String,
}

/// Surface lifecycle notifications.
#[derive(Debug, Clone)]
pub enum SurfaceEvent {
    /// A surface was opened (text is its content at open time).
    Opened(Surface),
    /// A surface was saved (text is its content at save time).
    Saved(Surface),
    /// A surface was closed.
    Closed(PathBuf),
}

/// Provider of editable surfaces and their events.
pub trait Workspace: Send + Sync + 'static {
    /// Per-surface save-hook registration guard; dropping it detaches the
    /// hook.
    type Hook: Send + 'static;

    /// Currently open surfaces.
    fn open_surfaces(&self) -> Vec<Surface>;

    /// Subscribe to surface lifecycle events.
    fn events(&self) -> broadcast::Receiver<SurfaceEvent>;

    /// Attach a save hook to one surface.
    fn attach_save_hook(&self, path: &Path) -> Self::Hook;
}
