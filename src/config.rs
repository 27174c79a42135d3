//! Runtime configuration for an [`Environment`](crate::environment::Environment)

use serde::{Deserialize, Serialize};
use std::thread::{Thread, ThreadId};

/// Disables recording when set to `0`, `false` or `off`
pub const ENV_PROFILING: &str = "BENCHTREE_PROFILING";
/// First chunk capacity of every per-thread node arena
pub const ENV_CHUNK: &str = "BENCHTREE_CHUNK";
/// Prefix report keys with the thread name when set
pub const ENV_THREAD_LABELS: &str = "BENCHTREE_THREAD_LABELS";

/// Configuration of a timing environment
///
/// # Example
/// ```
/// use benchtree::config::Config;
///
/// let config = Config::default();
/// assert!(config.enabled);
/// assert_eq!(config.chunk_capacity, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// When false every guard is a no-op and nothing is recorded
    pub enabled: bool,

    /// Capacity of the first chunk of each thread's node arena
    ///
    /// Later chunks double in size. Small values save memory for threads
    /// that record little; large values reduce the number of allocations
    /// for deep or wide trees.
    pub chunk_capacity: usize,

    /// Use `name@ThreadId(n)` instead of `ThreadId(n)` as the report key of
    /// named threads
    pub thread_labels: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_capacity: crate::stable_store::DEFAULT_CHUNK_CAPACITY,
            thread_labels: false,
        }
    }
}

impl Config {
    /// A configuration that records nothing
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Defaults overridden by the `BENCHTREE_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(ENV_PROFILING) {
            config.enabled = !matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off"
            );
        }

        if let Ok(value) = std::env::var(ENV_CHUNK) {
            match value.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.chunk_capacity = capacity,
                _ => tracing::warn!(
                    "ignoring {}={:?}: expected a positive integer",
                    ENV_CHUNK,
                    value
                ),
            }
        }

        config.thread_labels = std::env::var_os(ENV_THREAD_LABELS).is_some();
        config
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = capacity.max(1);
        self
    }

    pub fn with_thread_labels(mut self, labels: bool) -> Self {
        self.thread_labels = labels;
        self
    }

    /// Report key for `thread` under this configuration
    pub fn thread_key(&self, thread: &Thread) -> String {
        match (self.thread_labels, thread.name()) {
            (true, Some(name)) => format!("{}@{}", name, thread_key(thread.id())),
            _ => thread_key(thread.id()),
        }
    }
}

/// Default report key of a thread: its `ThreadId` debug representation
pub fn thread_key(id: ThreadId) -> String {
    format!("{:?}", id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_vars() {
        std::env::remove_var(ENV_PROFILING);
        std::env::remove_var(ENV_CHUNK);
        std::env::remove_var(ENV_THREAD_LABELS);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.enabled);
        assert_eq!(config.chunk_capacity, 16);
        assert!(!config.thread_labels);
    }

    #[test]
    fn test_disabled_config() {
        assert!(!Config::disabled().enabled);
    }

    #[test]
    fn test_builder_setters() {
        let config = Config::default()
            .with_enabled(false)
            .with_chunk_capacity(0)
            .with_thread_labels(true);
        assert!(!config.enabled);
        assert_eq!(config.chunk_capacity, 1);
        assert!(config.thread_labels);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_vars();
        assert_eq!(Config::from_env(), Config::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_vars();
        std::env::set_var(ENV_PROFILING, "off");
        std::env::set_var(ENV_CHUNK, "64");
        std::env::set_var(ENV_THREAD_LABELS, "1");

        let config = Config::from_env();
        clear_vars();

        assert!(!config.enabled);
        assert_eq!(config.chunk_capacity, 64);
        assert!(config.thread_labels);
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_invalid_chunk() {
        clear_vars();
        std::env::set_var(ENV_PROFILING, "yes");
        std::env::set_var(ENV_CHUNK, "zero");

        let config = Config::from_env();
        clear_vars();

        assert!(config.enabled);
        assert_eq!(config.chunk_capacity, 16);
    }

    #[test]
    fn test_thread_key_with_labels() {
        let handle = std::thread::Builder::new()
            .name("worker-7".into())
            .spawn(|| {
                let current = std::thread::current();
                (
                    Config::default().thread_key(&current),
                    Config::default().with_thread_labels(true).thread_key(&current),
                    thread_key(current.id()),
                )
            })
            .unwrap();
        let (plain, labelled, raw) = handle.join().unwrap();

        assert_eq!(plain, raw);
        assert!(raw.starts_with("ThreadId("));
        assert_eq!(labelled, format!("worker-7@{}", raw));
    }
}
