//! Configuration file observation.
//!
//! Watches `ethercore.toml` for changes and republishes the parsed
//! configuration over a tokio watch channel. Rewrites that do not change the
//! file content are skipped by comparison; a file that fails to parse or
//! validate keeps the last good configuration live (logged, not fatal).

use crate::config::{ConfigHandle, CoreConfig};
use crate::log;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

/// A live config observation. Dropping it stops the file watcher and closes
/// the channel, which ends the subscription reconciler's loop.
pub struct ConfigWatcher {
    /// Watcher handle (must be kept alive)
    _watcher: RecommendedWatcher,
    pub rx: watch::Receiver<CoreConfig>,
}

/// Start observing the config file backing `initial`.
///
/// The channel is seeded with `initial`, so a consumer that reads the
/// current value before awaiting changes treats first delivery and later
/// changes identically.
pub fn spawn(initial: CoreConfig, handle: ConfigHandle) -> notify::Result<ConfigWatcher> {
    let config_path = initial.config_path.clone();
    let root = initial.root.clone();
    let last_content = Arc::new(Mutex::new(
        fs::read_to_string(&config_path).unwrap_or_default(),
    ));

    let (tx, rx) = watch::channel(initial);

    let mut watcher = {
        let config_path = config_path.clone();
        notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            let Ok(event) = result else { return };
            // The parent directory is watched, so filter to the config file.
            let concerns_config = event
                .paths
                .iter()
                .any(|p| p.file_name() == config_path.file_name());
            if !concerns_config {
                return;
            }
            reload(&config_path, &root, &last_content, &handle, &tx);
        })?
    };

    // Watch the parent directory: editors replace files on save, and a
    // watch on the file itself goes stale after the first replacement.
    let watch_target = config_path.parent().unwrap_or(Path::new("."));
    if watch_target.exists() {
        watcher.watch(watch_target, RecursiveMode::NonRecursive)?;
    }

    Ok(ConfigWatcher {
        _watcher: watcher,
        rx,
    })
}

fn reload(
    config_path: &Path,
    root: &Path,
    last_content: &Mutex<String>,
    handle: &ConfigHandle,
    tx: &watch::Sender<CoreConfig>,
) {
    let Ok(content) = fs::read_to_string(config_path) else {
        return;
    };

    {
        let mut last = last_content.lock();
        if *last == content {
            return;
        }
        *last = content.clone();
    }

    match CoreConfig::parse(&content) {
        Ok(mut config) => {
            config.config_path = config_path.to_path_buf();
            config.root = root.to_path_buf();
            log!("config"; "configuration reloaded");
            handle.store(config.clone());
            let _ = tx.send(config);
        }
        Err(error) => {
            log!("config"; "reload failed, keeping previous configuration: {error}");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionEnv;

    #[test]
    fn test_reload_publishes_parsed_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("ethercore.toml");
        fs::write(&config_path, "[provider]\nexecution = \"network\"\n").unwrap();

        let handle = ConfigHandle::new(CoreConfig::default());
        let (tx, rx) = watch::channel(CoreConfig::default());
        let last_content = Mutex::new(String::new());

        reload(&config_path, dir.path(), &last_content, &handle, &tx);

        assert_eq!(rx.borrow().provider.execution, ExecutionEnv::Network);
        assert_eq!(handle.load().provider.execution, ExecutionEnv::Network);
    }

    #[test]
    fn test_reload_skips_unchanged_content() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("ethercore.toml");
        let content = "[compile]\non_save = false\n";
        fs::write(&config_path, content).unwrap();

        let handle = ConfigHandle::new(CoreConfig::default());
        let (tx, mut rx) = watch::channel(CoreConfig::default());
        rx.borrow_and_update();
        let last_content = Mutex::new(content.to_string());

        reload(&config_path, dir.path(), &last_content, &handle, &tx);

        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_reload_keeps_last_good_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("ethercore.toml");
        fs::write(&config_path, "[provider\n").unwrap();

        let mut good = CoreConfig::default();
        good.provider.rpc_address = "http://localhost:7777".into();
        let handle = ConfigHandle::new(good.clone());
        let (tx, rx) = watch::channel(good);
        let last_content = Mutex::new(String::new());

        reload(&config_path, dir.path(), &last_content, &handle, &tx);

        assert_eq!(rx.borrow().provider.rpc_address, "http://localhost:7777");
        assert_eq!(handle.load().provider.rpc_address, "http://localhost:7777");
    }
}
