//! Filesystem-backed workspace.
//!
//! Watches a workspace directory and maps file events onto surface events:
//! a created source file is an opened surface, a write is a save, a removal
//! is a close. Raw watcher noise is debounced before it becomes events.
//!
//! ```text
//! Watcher → Debouncer (pure timing) → SurfaceEvent broadcast
//! ```

use super::{Surface, SurfaceEvent, Workspace};
use crate::pipeline::SOURCE_EXTENSION;
use crate::{debug, log};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Debounce configuration
const DEBOUNCE_MS: u64 = 200;
const POLL_MS: u64 = 50;
const EVENT_BUFFER: usize = 64;

/// Check if path is a temp/backup file (editor artifacts)
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

fn is_source_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(SOURCE_EXTENSION)
}

// =============================================================================
// Workspace
// =============================================================================

/// Notify-backed [`Workspace`] over a directory of source files.
pub struct WatchedWorkspace {
    root: PathBuf,
    events: broadcast::Sender<SurfaceEvent>,
    /// Watcher handle (must be kept alive; mutex only for `Sync`)
    _watcher: Mutex<RecommendedWatcher>,
}

/// Per-surface save-hook guard. The watcher itself is always running; the
/// guard records the registration that gates reactions to this surface.
#[derive(Debug)]
pub struct SaveHook {
    path: PathBuf,
}

impl Drop for SaveHook {
    fn drop(&mut self) {
        debug!("workspace"; "save hook detached: {}", self.path.display());
    }
}

impl WatchedWorkspace {
    pub fn new(root: PathBuf) -> notify::Result<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        // Sync channel for notify (it doesn't support async)
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |result| {
            let _ = notify_tx.send(result);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let events_out = events.clone();
        std::thread::spawn(move || debounce_loop(&notify_rx, &events_out));

        Ok(Self {
            root,
            events,
            _watcher: Mutex::new(watcher),
        })
    }
}

impl Workspace for WatchedWorkspace {
    type Hook = SaveHook;

    fn open_surfaces(&self) -> Vec<Surface> {
        let mut surfaces = Vec::new();
        for entry in jwalk::WalkDir::new(&self.root).into_iter().flatten() {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_source_file(&path) || is_temp_file(&path) {
                continue;
            }
            if let Ok(text) = std::fs::read_to_string(&path) {
                surfaces.push(Surface { path, text });
            }
        }
        surfaces.sort_by(|a, b| a.path.cmp(&b.path));
        surfaces
    }

    fn events(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }

    fn attach_save_hook(&self, path: &Path) -> SaveHook {
        debug!("workspace"; "save hook attached: {}", path.display());
        SaveHook {
            path: path.to_path_buf(),
        }
    }
}

// =============================================================================
// Debounce loop
// =============================================================================

fn debounce_loop(
    notify_rx: &std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    events: &broadcast::Sender<SurfaceEvent>,
) {
    let mut debouncer = Debouncer::new();
    loop {
        match notify_rx.recv_timeout(Duration::from_millis(POLL_MS)) {
            Ok(Ok(event)) => debouncer.add_event(&event),
            Ok(Err(error)) => log!("watch"; "notify error: {error}"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let Some(changes) = debouncer.take_if_ready() else {
            continue;
        };
        for (path, kind) in changes {
            let Some(event) = surface_event(path, kind) else {
                continue;
            };
            // No receivers just means no scope is live right now.
            let _ = events.send(event);
        }
    }
}

/// Map one debounced change to a surface event, reading current text for
/// open/save.
fn surface_event(path: PathBuf, kind: ChangeKind) -> Option<SurfaceEvent> {
    match kind {
        ChangeKind::Removed => Some(SurfaceEvent::Closed(path)),
        ChangeKind::Created | ChangeKind::Modified => {
            let text = std::fs::read_to_string(&path).ok()?;
            let surface = Surface { path, text };
            Some(match kind {
                ChangeKind::Created => SurfaceEvent::Opened(surface),
                _ => SurfaceEvent::Saved(surface),
            })
        }
    }
}

// =============================================================================
// Debouncer - Pure timing and event deduplication
// =============================================================================

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// Pure debouncer: only handles timing and event deduplication.
struct Debouncer {
    /// Path → ChangeKind (dedup is free via HashMap key uniqueness)
    changes: FxHashMap<PathBuf, ChangeKind>,
    last_event: Option<Instant>,
}

impl Debouncer {
    fn new() -> Self {
        Self {
            changes: FxHashMap::default(),
            last_event: None,
        }
    }

    /// Add a notify event, applying dedup rules:
    /// - Removed + Created/Modified → restored, use the new event
    /// - Modified + Removed → deleted, upgrade to Removed
    /// - Created + Removed → appeared then vanished, discard
    /// - Same type events: first event wins
    fn add_event(&mut self, event: &notify::Event) {
        use notify::EventKind;

        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Remove(_) => ChangeKind::Removed,
            EventKind::Modify(modify) => {
                // Ignore metadata-only changes (mtime/atime/chmod noise)
                if matches!(modify, notify::event::ModifyKind::Metadata(_)) {
                    return;
                }
                ChangeKind::Modified
            }
            _ => return,
        };

        for path in &event.paths {
            if is_temp_file(path) || !is_source_file(path) {
                continue;
            }
            let path = path.clone();

            if let Some(&existing) = self.changes.get(&path) {
                match (existing, kind) {
                    (ChangeKind::Removed, ChangeKind::Created | ChangeKind::Modified) => {
                        self.changes.insert(path, kind);
                    }
                    (ChangeKind::Modified, ChangeKind::Removed) => {
                        self.changes.insert(path, ChangeKind::Removed);
                    }
                    (ChangeKind::Created, ChangeKind::Removed) => {
                        self.changes.remove(&path);
                    }
                    _ => continue,
                }
                self.last_event = Some(Instant::now());
                continue;
            }

            self.changes.insert(path, kind);
            self.last_event = Some(Instant::now());
        }
    }

    /// Take events once the debounce window has elapsed.
    fn take_if_ready(&mut self) -> Option<Vec<(PathBuf, ChangeKind)>> {
        let last_event = self.last_event?;
        if last_event.elapsed() < Duration::from_millis(DEBOUNCE_MS) {
            return None;
        }

        self.last_event = None;
        let changes = std::mem::take(&mut self.changes);
        if changes.is_empty() {
            return None;
        }

        let mut ordered: Vec<_> = changes.into_iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));
        Some(ordered)
    }
}

// =============================================================================
// Tests
// =============================================================================
