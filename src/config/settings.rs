//! Shared runtime settings.
//!
//! The engine reads its knobs through a snapshot so a long-running loop
//! never holds the lock across an await. Toggles like `trading_enabled`
//! can be flipped while the engine is live.

use std::sync::{Arc, RwLock};

use crate::config::loader::Config;

/// Thread-safe handle over the loaded configuration.
#[derive(Clone)]
pub struct Settings {
    inner: Arc<RwLock<Config>>,
}

impl Settings {
    pub fn new(config: Config) -> Settings {
        Settings {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Cheap clone of the full configuration at this instant.
    pub fn snapshot(&self) -> Config {
        self.inner.read().expect("settings lock poisoned").clone()
    }

    /// Soft pause: block new entries without touching open positions.
    pub fn set_trading_enabled(&self, enabled: bool) {
        self.inner
            .write()
            .expect("settings lock poisoned")
            .engine
            .trading_enabled = enabled;
    }

    pub fn trading_enabled(&self) -> bool {
        self.inner
            .read()
            .expect("settings lock poisoned")
            .engine
            .trading_enabled
    }
}
