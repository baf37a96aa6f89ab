//! Hot reload
//!
//! Polls modification times of every file resident in a file registry and
//! reloads the ones that changed. The reload cascades to everything built
//! from those files.

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::assets::FileDescriptor;
use crate::error::Result;
use crate::registries::Registries;
use crate::registry::RegistryKey;

/// Time provider abstraction for hot-reload testing
pub trait TimeProvider: Send + Sync {
    fn now(&self) -> SystemTime;
    fn file_modified(&self, path: &Path) -> std::io::Result<SystemTime>;
}

/// System time provider for production use
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn file_modified(&self, path: &Path) -> std::io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub check_interval_ms: u64,
    pub enabled: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 500,
            enabled: true,
        }
    }
}

/// Polling watcher over one file registry
pub struct HotReloadWatcher {
    files: RegistryKey<FileDescriptor>,
    /// Last seen modification time per resident name
    baselines: AHashMap<String, SystemTime>,
    last_check: Option<SystemTime>,
    check_interval: Duration,
    enabled: bool,
    time_provider: Box<dyn TimeProvider>,
}

impl HotReloadWatcher {
    pub fn new(files: RegistryKey<FileDescriptor>) -> Self {
        Self::with_config(files, WatcherConfig::default(), Box::new(SystemTimeProvider))
    }

    pub fn with_config(
        files: RegistryKey<FileDescriptor>,
        config: WatcherConfig,
        provider: Box<dyn TimeProvider>,
    ) -> Self {
        Self {
            files,
            baselines: AHashMap::new(),
            last_check: None,
            check_interval: Duration::from_millis(config.check_interval_ms),
            enabled: config.enabled,
            time_provider: provider,
        }
    }

    pub fn set_check_interval(&mut self, interval: Duration) {
        self.check_interval = interval;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of files with a recorded baseline
    pub fn tracked(&self) -> usize {
        self.baselines.len()
    }

    /// Scan if the check interval has elapsed. Returns how many files were
    /// reloaded.
    pub fn poll(&mut self, registries: &mut Registries) -> Result<usize> {
        if !self.enabled {
            return Ok(0);
        }
        let now = self.time_provider.now();
        if let Some(last) = self.last_check {
            let elapsed = now.duration_since(last).unwrap_or_default();
            if elapsed < self.check_interval {
                return Ok(0);
            }
        }
        self.last_check = Some(now);
        self.scan(registries)
    }

    /// Scan now, ignoring the check interval.
    pub fn force_check(&mut self, registries: &mut Registries) -> Result<usize> {
        if !self.enabled {
            return Ok(0);
        }
        self.last_check = Some(self.time_provider.now());
        self.scan(registries)
    }

    fn scan(&mut self, registries: &mut Registries) -> Result<usize> {
        let registry = registries.registry(self.files)?;
        let names = registries.names(self.files)?;
        let mut live = AHashSet::with_capacity(names.len());
        let mut changed = Vec::new();

        for name in names {
            let Some(path) = registry.descriptor().resolve(&name) else {
                continue;
            };
            match self.time_provider.file_modified(&path) {
                Ok(modified) => {
                    if let Some(previous) = self.baselines.insert(name.clone(), modified) {
                        if previous != modified {
                            changed.push(name.clone());
                        }
                    }
                }
                Err(err) => debug!(name, %err, "cannot stat watched file"),
            }
            live.insert(name);
        }
        // Evicted names start over if they come back.
        self.baselines.retain(|name, _| live.contains(name));

        let mut reloaded = 0;
        for name in changed {
            match registries.reload(self.files, &name) {
                Ok(summary) => {
                    reloaded += 1;
                    debug!(name, cascade = summary.reloaded, failed = summary.failed, "hot-reloaded");
                }
                Err(err) => warn!(name, %err, "hot reload failed"),
            }
        }
        Ok(reloaded)
    }
}
