//! Runtime configuration.
//!
//! [`RuntimeConfig`] is built from defaults, then optionally overlaid with
//! `VELA_*` environment variables ([`RuntimeConfig::from_env`]) or a JSON
//! object ([`RuntimeConfig::from_json`], used by the C boundary).
//!
//! | Variable | JSON field | Default |
//! |----------|------------|---------|
//! | `VELA_WORKER_THREADS` | `workerThreads` | available parallelism |
//! | `VELA_POLL_INTERVAL_MS` | `pollIntervalMs` | 50 |
//! | `VELA_SHUTDOWN_GRACE_MS` | `shutdownGraceMs` | 5000 |
//! | `VELA_PLUGIN_TIMEOUT_MS` | `pluginTimeoutMs` | none |
//! | `VELA_HANDLE_SIGNALS` | `handleSignals` | true |
//! | - | `threadName` | `vela-worker` |
//! | - | `maxBlockingThreads` | tokio default |

use std::time::Duration;

use serde::Deserialize;
use vela_system::resource::GlobalResource;

use crate::error::RuntimeError;

/// Default event loop polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Default grace period granted to tasks at shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration of a [`Runtime`](crate::Runtime).
///
/// Installed as a global resource when the runtime is built.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vela_runtime::RuntimeConfig;
///
/// let config = RuntimeConfig::default()
///     .with_worker_threads(2)
///     .with_shutdown_grace(Duration::from_millis(200))
///     .with_signals(false);
/// assert_eq!(config.worker_threads, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Size of the worker pool.
    pub worker_threads: usize,
    /// How often the event loop re-checks the shutdown flag.
    pub poll_interval: Duration,
    /// How long tasks may take to exit after cancellation.
    pub shutdown_grace: Duration,
    /// Upper bound for in-process plugin calls.
    pub plugin_call_timeout: Option<Duration>,
    /// Whether the event loop installs SIGINT/SIGTERM handlers.
    pub handle_signals: bool,
    /// Name of worker threads.
    pub thread_name: String,
    /// Cap on the blocking pool used for plugin calls.
    pub max_blocking_threads: Option<usize>,
}

impl GlobalResource for RuntimeConfig {}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(4, usize::from),
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            plugin_call_timeout: None,
            handle_signals: true,
            thread_name: "vela-worker".to_string(),
            max_blocking_threads: None,
        }
    }
}

impl RuntimeConfig {
    /// Sets the worker pool size.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Sets the shutdown polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Bounds in-process plugin calls.
    #[must_use]
    pub fn with_plugin_call_timeout(mut self, timeout: Duration) -> Self {
        self.plugin_call_timeout = Some(timeout);
        self
    }

    /// Enables or disables signal handling in the event loop.
    #[must_use]
    pub fn with_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Sets the worker thread name.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Caps the blocking pool.
    #[must_use]
    pub fn with_max_blocking_threads(mut self, threads: usize) -> Self {
        self.max_blocking_threads = Some(threads);
        self
    }

    /// Defaults overlaid with `VELA_*` environment variables.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidConfig`] naming the first malformed variable.
    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Overlays variables resolved through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn overlay_env(
        self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RuntimeError> {
        let overlay = ConfigOverlay {
            worker_threads: parse_var(&lookup, "VELA_WORKER_THREADS")?,
            poll_interval_ms: parse_var(&lookup, "VELA_POLL_INTERVAL_MS")?,
            shutdown_grace_ms: parse_var(&lookup, "VELA_SHUTDOWN_GRACE_MS")?,
            plugin_timeout_ms: parse_var(&lookup, "VELA_PLUGIN_TIMEOUT_MS")?,
            handle_signals: match lookup("VELA_HANDLE_SIGNALS") {
                Some(raw) => Some(parse_bool(&raw).ok_or_else(|| {
                    RuntimeError::invalid_config("VELA_HANDLE_SIGNALS", "expected a boolean")
                })?),
                None => None,
            },
            thread_name: None,
            max_blocking_threads: None,
        };
        overlay.apply(self)
    }

    /// Defaults overlaid with a JSON object using the camelCase field names.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidConfig`] for malformed JSON, unknown fields or
    /// out-of-range values.
    pub fn from_json(json: &str) -> Result<Self, RuntimeError> {
        let overlay: ConfigOverlay = serde_json::from_str(json)
            .map_err(|err| RuntimeError::invalid_config("config json", err.to_string()))?;
        overlay.apply(Self::default())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct ConfigOverlay {
    worker_threads: Option<usize>,
    poll_interval_ms: Option<u64>,
    shutdown_grace_ms: Option<u64>,
    plugin_timeout_ms: Option<u64>,
    handle_signals: Option<bool>,
    thread_name: Option<String>,
    max_blocking_threads: Option<usize>,
}

impl ConfigOverlay {
    fn apply(self, mut config: RuntimeConfig) -> Result<RuntimeConfig, RuntimeError> {
        if let Some(threads) = self.worker_threads {
            if threads == 0 {
                return Err(RuntimeError::invalid_config("workerThreads", "must be at least 1"));
            }
            config.worker_threads = threads;
        }
        if let Some(ms) = self.poll_interval_ms {
            if ms == 0 {
                return Err(RuntimeError::invalid_config("pollIntervalMs", "must be positive"));
            }
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.shutdown_grace_ms {
            config.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = self.plugin_timeout_ms {
            config.plugin_call_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(enabled) = self.handle_signals {
            config.handle_signals = enabled;
        }
        if let Some(name) = self.thread_name {
            config.thread_name = name;
        }
        if let Some(threads) = self.max_blocking_threads {
            config.max_blocking_threads = Some(threads);
        }
        Ok(config)
    }
}

fn parse_var<T: core::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, RuntimeError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RuntimeError::invalid_config(key, format!("'{raw}' is not a number"))),
        None => Ok(None),
    }
}

/// Accepts "true", "false", "1", "0", "yes", "no", "on", "off".
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_overlays_defaults() {
        let config = RuntimeConfig::default()
            .overlay_env(env(&[
                ("VELA_WORKER_THREADS", "3"),
                ("VELA_POLL_INTERVAL_MS", "10"),
                ("VELA_PLUGIN_TIMEOUT_MS", "250"),
                ("VELA_HANDLE_SIGNALS", "off"),
            ]))
            .unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.plugin_call_timeout, Some(Duration::from_millis(250)));
        assert!(!config.handle_signals);
        assert_eq!(config.shutdown_grace, DEFAULT_SHUTDOWN_GRACE);
    }

    #[test]
    fn malformed_variable_is_named() {
        let err = RuntimeConfig::default()
            .overlay_env(env(&[("VELA_SHUTDOWN_GRACE_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("VELA_SHUTDOWN_GRACE_MS"));

        let err = RuntimeConfig::default()
            .overlay_env(env(&[("VELA_HANDLE_SIGNALS", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("VELA_HANDLE_SIGNALS"));
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(
            RuntimeConfig::default()
                .overlay_env(env(&[("VELA_WORKER_THREADS", "0")]))
                .is_err()
        );
    }

    #[test]
    fn json_overlay() {
        let config = RuntimeConfig::from_json(
            r#"{"workerThreads": 2, "handleSignals": false, "threadName": "embedded"}"#,
        )
        .unwrap();
        assert_eq!(config.worker_threads, 2);
        assert!(!config.handle_signals);
        assert_eq!(config.thread_name, "embedded");

        assert!(RuntimeConfig::from_json(r#"{"workers": 2}"#).is_err());
        assert!(RuntimeConfig::from_json("not json").is_err());
    }
}
