//! Solidity import closure resolution.
//!
//! Expands a seed source map into the full transitive closure of statically
//! discoverable imports. Pure function of the filesystem at call time:
//! every import specifier is resolved relative to the directory of the file
//! that declares it, read once, and keyed by its path relative to the root
//! directory. Re-visits (diamonds, cycles) are tolerated via the key set.

use crate::store::SourceMap;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use std::{fs, io};
use thiserror::Error;

/// Import resolution failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unresolvable import `{import}` (imported from `{from}`): {source}")]
    Missing {
        import: String,
        from: String,
        #[source]
        source: io::Error,
    },
}

/// Expands a root file into a closure of dependency file contents.
pub trait ImportResolver: Send + Sync + 'static {
    /// Complete `sources` with every transitively imported file, resolving
    /// specifiers against `dir` (the root file's directory).
    fn resolve(&self, dir: &Path, sources: SourceMap) -> Result<SourceMap, ResolveError>;
}

// =============================================================================
// Solidity resolver
// =============================================================================

/// Matches `import "./A.sol";` and `import {X} from "./A.sol";` forms.
fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*import\s+(?:[^"';]*?\bfrom\s+)?["']([^"']+)["']"#).unwrap()
    })
}

/// Extract import specifiers from source text, in declaration order.
pub fn scan_imports(content: &str) -> Vec<String> {
    import_re()
        .captures_iter(content)
        .map(|captures| captures[1].to_string())
        .collect()
}

/// Default [`ImportResolver`]: reads imported files from disk.
pub struct SolImportResolver;

impl ImportResolver for SolImportResolver {
    fn resolve(&self, dir: &Path, mut sources: SourceMap) -> Result<SourceMap, ResolveError> {
        // (key, directory the file's own imports resolve against)
        let mut queue: Vec<(String, PathBuf)> = sources
            .file_names()
            .map(|name| (name.clone(), dir.to_path_buf()))
            .collect();

        while let Some((key, base)) = queue.pop() {
            let content = match sources.get(&key) {
                Some(entry) => entry.content.clone(),
                None => continue,
            };

            for specifier in scan_imports(&content) {
                let resolved = normalize(&base.join(&specifier));
                let import_key = relative_key(&resolved, dir);
                if sources.contains(&import_key) {
                    continue;
                }

                let imported =
                    fs::read_to_string(&resolved).map_err(|source| ResolveError::Missing {
                        import: specifier.clone(),
                        from: key.clone(),
                        source,
                    })?;

                let import_base = resolved
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| dir.to_path_buf());
                sources.insert(import_key.clone(), imported);
                queue.push((import_key, import_base));
            }
        }

        Ok(sources)
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Logical source-map key for a resolved file: its path relative to the root
/// directory when inside it, its file name otherwise.
fn relative_key(resolved: &Path, dir: &Path) -> String {
    resolved
        .strip_prefix(dir)
        .map(|relative| relative.to_string_lossy().into_owned())
        .unwrap_or_else(|_| {
            resolved
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| resolved.to_string_lossy().into_owned())
        })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_imports_plain_and_symbol_forms() {
        let imports = scan_imports(
            r#"
            pragma solidity ^0.8.0;
            import "./A.sol";
            import {Thing, Other} from "./lib/B.sol";
            import './C.sol';
            // import "./commented-out.sol";
            "#,
        );
        assert_eq!(imports, vec!["./A.sol", "./lib/B.sol", "./C.sol"]);
    }

    #[test]
    fn test_root_with_two_imports_yields_three_entries() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "A.sol", "contract A {}");
        write(dir.path(), "B.sol", "contract B {}");

        let root = r#"
            import "./A.sol";
            import "./B.sol";
            contract Root {}
        "#;
        let sources = SolImportResolver
            .resolve(dir.path(), SourceMap::single("Root.sol", root))
            .unwrap();

        assert_eq!(sources.len(), 3);
        assert!(sources.contains("Root.sol"));
        assert!(sources.contains("A.sol"));
        assert!(sources.contains("B.sol"));
    }

    #[test]
    fn test_nested_imports_resolve_against_importing_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib/B.sol", "import \"./C.sol\";\ncontract B {}");
        write(dir.path(), "lib/C.sol", "contract C {}");

        let sources = SolImportResolver
            .resolve(
                dir.path(),
                SourceMap::single("Root.sol", "import \"./lib/B.sol\";"),
            )
            .unwrap();

        assert_eq!(sources.len(), 3);
        assert!(sources.contains("lib/B.sol"));
        assert!(sources.contains("lib/C.sol"));
    }

    #[test]
    fn test_cyclic_imports_terminate() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "A.sol", "import \"./B.sol\";\ncontract A {}");
        write(dir.path(), "B.sol", "import \"./A.sol\";\ncontract B {}");

        let root = fs::read_to_string(dir.path().join("A.sol")).unwrap();
        let sources = SolImportResolver
            .resolve(dir.path(), SourceMap::single("A.sol", root))
            .unwrap();

        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn test_missing_import_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = SolImportResolver
            .resolve(
                dir.path(),
                SourceMap::single("Root.sol", "import \"./gone.sol\";"),
            )
            .unwrap_err();

        let ResolveError::Missing { import, from, .. } = err;
        assert_eq!(import, "./gone.sol");
        assert_eq!(from, "Root.sol");
    }

    #[test]
    fn test_no_imports_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let sources = SolImportResolver
            .resolve(dir.path(), SourceMap::single("A.sol", "contract A {}"))
            .unwrap();
        assert_eq!(sources.len(), 1);
    }
}
