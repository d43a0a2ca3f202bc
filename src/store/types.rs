//! Shared data model: compile artifacts, diagnostics, sync status, sources.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Diagnostics
// =============================================================================

/// Diagnostic severity, matching the compiler's own classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// Source span a diagnostic points at. `start`/`end` are byte offsets; the
/// compiler reports `-1` when a span is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub start: i64,
    pub end: i64,
}

/// A structured error or warning emitted by resolution or compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            location: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Error)
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => {
                write!(f, "{}: {} ({})", self.severity, self.message, location.file)
            }
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

// =============================================================================
// Compile result
// =============================================================================

/// Outcome of one compiler invocation. A result is either a successful
/// artifact or an ordered diagnostic list, never both.
///
/// `contracts` is the compiler's file → contract-name → artifact object.
/// Iteration order is the order the compiler returned (`serde_json` is built
/// with `preserve_order`), which downstream interface dispatches rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompileResult {
    Success { contracts: Map<String, Value> },
    Failure { diagnostics: Vec<Diagnostic> },
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn contracts(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Success { contracts } => Some(contracts),
            Self::Failure { .. } => None,
        }
    }
}

// =============================================================================
// Sync status
// =============================================================================

/// Node synchronization progress, as reported by the `syncing` subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub current_block: u64,
    pub highest_block: u64,
    pub known_states: u64,
    pub pulled_states: u64,
    pub starting_block: u64,
}

// =============================================================================
// Source map
// =============================================================================

/// One source file's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub content: String,
}

/// The complete set of source file contents needed for one compile, keyed by
/// logical filename. Keys are unique; content is immutable after insertion.
///
/// Serializes directly as the `sources` object of the compiler's
/// standard-json input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceMap {
    files: BTreeMap<String, SourceEntry>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A one-entry map, the seed for import-closure expansion.
    pub fn single(name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut map = Self::new();
        map.insert(name, content);
        map
    }

    /// Insert a file. Returns false (and leaves the existing content
    /// untouched) if the key is already present.
    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<String>) -> bool {
        match self.files.entry(name.into()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(SourceEntry {
                    content: content.into(),
                });
                true
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&SourceEntry> {
        self.files.get(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file_names(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SourceEntry)> {
        self.files.iter()
    }
}

// =============================================================================
// Tests
// =============================================================================
