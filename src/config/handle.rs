//! Shared config cell with atomic reload support.
//!
//! Uses `arc-swap` for lock-free reads and atomic config replacement, so the
//! gateway can read current provider endpoints without taking a lock while
//! the config watcher swaps in reloaded values. The handle is passed
//! explicitly to every component that needs it.

use crate::config::CoreConfig;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Cheap-to-clone handle onto the current configuration.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<CoreConfig>>,
}

impl ConfigHandle {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Current configuration.
    #[inline]
    pub fn load(&self) -> Arc<CoreConfig> {
        self.inner.load_full()
    }

    /// Replace the configuration atomically.
    pub fn store(&self, config: CoreConfig) {
        self.inner.store(Arc::new(config));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_visible_through_clones() {
        let handle = ConfigHandle::new(CoreConfig::default());
        let observer = handle.clone();

        let mut updated = CoreConfig::default();
        updated.provider.rpc_address = "http://localhost:9999".into();
        handle.store(updated);

        assert_eq!(
            observer.load().provider.rpc_address,
            "http://localhost:9999"
        );
    }
}
