//! Read-only typed configuration view (component C6).
//!
//! The core never parses a configuration file itself — an upper layer hands it
//! a `HashMap<String, ConfigValue>` (e.g. assembled from TOML/env/CLI flags,
//! all out of scope here) and each component resolves its own typed,
//! defaulted view out of it at construction time. The only configuration
//! value the core lets change at runtime is buffer-pool capacity, via the
//! explicit `BufferPool::resize` call — not a config-watcher callback.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// A single configuration value as consumed by the storage core.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValue {
    Int(i64),
    Bool(bool),
    String(String),
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

/// Read-only accessor over a flat key/value configuration map.
///
/// Keys are the dotted names in `spec.md` §6 (`buffer_pool.pool_size`, ...).
/// Missing or mistyped keys fall back to the documented default rather than
/// erroring — configuration parsing failures are an upper-layer concern.
#[derive(Clone, Debug, Default)]
pub struct ConfigView {
    values: HashMap<String, ConfigValue>,
}

impl ConfigView {
    pub fn new(values: HashMap<String, ConfigValue>) -> Self {
        Self { values }
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(ConfigValue::Int(v)) => *v,
            _ => default,
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(ConfigValue::Bool(v)) => *v,
            _ => default,
        }
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(ConfigValue::String(v)) => v.clone(),
            _ => default.to_string(),
        }
    }
}

/// Tunables consulted by `DiskManager`/`Page` construction.
#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseConfig {
    pub db_file_path: PathBuf,
    pub page_size: usize,
}

impl DatabaseConfig {
    pub fn from_view(view: &ConfigView) -> Self {
        Self {
            db_file_path: PathBuf::from(
                view.get_string("database.db_file_path", "./data/sqlcc.db"),
            ),
            page_size: view.get_int("database.page_size", 8192) as usize,
        }
    }
}

/// Tunables consulted by `BufferPool`/`BufferPoolSharded`.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferPoolConfig {
    pub pool_size: usize,
    pub read_lock_timeout: Duration,
    pub write_lock_timeout: Duration,
    pub default_lock_timeout: Duration,
    pub replacement_policy: String,
    pub enable_prefetch: bool,
}

impl BufferPoolConfig {
    pub fn from_view(view: &ConfigView) -> Self {
        Self {
            pool_size: view.get_int("buffer_pool.pool_size", 64) as usize,
            read_lock_timeout: Duration::from_millis(
                view.get_int("buffer_pool.read_lock_timeout_ms", 2000) as u64,
            ),
            write_lock_timeout: Duration::from_millis(
                view.get_int("buffer_pool.write_lock_timeout_ms", 5000) as u64,
            ),
            default_lock_timeout: Duration::from_millis(
                view.get_int("buffer_pool.default_lock_timeout_ms", 3000) as u64,
            ),
            replacement_policy: view.get_string("buffer_pool.replacement_policy", "LRU"),
            enable_prefetch: view.get_bool("buffer_pool.enable_prefetch", true),
        }
    }
}

/// Informational-only tunables consulted by `DiskManager`.
#[derive(Clone, Debug, PartialEq)]
pub struct DiskManagerConfig {
    pub enable_async_io: bool,
    pub enable_direct_io: bool,
}

impl DiskManagerConfig {
    pub fn from_view(view: &ConfigView) -> Self {
        Self {
            enable_async_io: view.get_bool("disk_manager.enable_async_io", true),
            enable_direct_io: view.get_bool("disk_manager.enable_direct_io", false),
        }
    }
}

/// Tunables consulted by `WalManager`.
#[derive(Clone, Debug, PartialEq)]
pub struct WalConfig {
    pub force_sync: bool,
    pub flush_interval: Duration,
}

impl WalConfig {
    pub fn from_view(view: &ConfigView) -> Self {
        Self {
            force_sync: view.get_bool("wal.force_sync", false),
            flush_interval: Duration::from_millis(
                view.get_int("wal.flush_interval_ms", 10) as u64
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_map_is_empty() {
        let view = ConfigView::default();
        assert_eq!(BufferPoolConfig::from_view(&view).pool_size, 64);
        assert_eq!(
            DatabaseConfig::from_view(&view).db_file_path,
            PathBuf::from("./data/sqlcc.db")
        );
        assert!(!DiskManagerConfig::from_view(&view).enable_direct_io);
        assert_eq!(
            WalConfig::from_view(&view).flush_interval,
            Duration::from_millis(10)
        );
    }

    #[test]
    fn explicit_values_override_defaults() {
        let mut map = HashMap::new();
        map.insert("buffer_pool.pool_size".to_string(), ConfigValue::Int(128));
        map.insert(
            "wal.force_sync".to_string(),
            ConfigValue::Bool(true),
        );
        let view = ConfigView::new(map);

        assert_eq!(BufferPoolConfig::from_view(&view).pool_size, 128);
        assert!(WalConfig::from_view(&view).force_sync);
    }

    #[test]
    fn type_mismatch_falls_back_to_default() {
        let mut map = HashMap::new();
        map.insert(
            "buffer_pool.pool_size".to_string(),
            ConfigValue::String("not-a-number".into()),
        );
        let view = ConfigView::new(map);
        assert_eq!(BufferPoolConfig::from_view(&view).pool_size, 64);
    }
}
