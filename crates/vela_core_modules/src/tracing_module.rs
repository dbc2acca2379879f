//! Logging setup.
//!
//! [`TracingModule`] installs the process-wide `tracing` subscriber.
//!
//! # Lifecycle
//!
//! - **`build()`** publishes the [`TracingConfig`] global so other modules can
//!   read the intended configuration while they build.
//! - **`ready()`** installs the subscriber. Installation is idempotent: when a
//!   subscriber is already set (a second runtime in the same process, or a
//!   test harness), the existing one is kept.
//!
//! # Example
//!
//! ```
//! use tracing::Level;
//! use vela_core_modules::{RuntimeInfoModule, TracingFormat, TracingModule};
//! use vela_system::server::Server;
//!
//! let mut server = Server::new();
//! server.add_modules(RuntimeInfoModule);
//! server.add_modules(
//!     TracingModule::default()
//!         .with_level(Level::DEBUG)
//!         .with_format(TracingFormat::Compact),
//! );
//! server.finish().unwrap();
//! ```

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vela_system::module::{Module, ModuleId};
use vela_system::resource::GlobalResource;
use vela_system::server::{Server, ServerError};

use crate::RuntimeInfoModule;

// ─────────────────────────────────────────────────────────────────────────────
// TracingFormat
// ─────────────────────────────────────────────────────────────────────────────

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingFormat {
    /// Multi-line human-readable output (default).
    #[default]
    Pretty,
    /// Single-line output.
    Compact,
    /// One JSON object per line, for log aggregation.
    Json,
}

impl core::str::FromStr for TracingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TracingConfig
// ─────────────────────────────────────────────────────────────────────────────

/// The logging configuration, as a read-only global.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Maximum level when no filter is given.
    pub level: Level,
    /// Output format.
    pub format: TracingFormat,
    /// Target filter, e.g. `vela_runtime=debug,vela_plugins=trace`.
    pub env_filter: Option<String>,
}

impl GlobalResource for TracingConfig {}

// ─────────────────────────────────────────────────────────────────────────────
// TracingModule
// ─────────────────────────────────────────────────────────────────────────────

/// Installs the `tracing` subscriber.
///
/// | Global | Description |
/// |--------|-------------|
/// | [`TracingConfig`] | The configuration this module installed |
///
/// Depends on [`RuntimeInfoModule`].
///
/// ```
/// use tracing::Level;
/// use vela_core_modules::{TracingFormat, TracingModule};
///
/// // Development
/// let dev = TracingModule::new()
///     .with_level(Level::DEBUG)
///     .with_span_events(true);
///
/// // Production
/// let prod = TracingModule::new()
///     .with_format(TracingFormat::Json)
///     .with_env_filter("vela_runtime=info,vela_plugins=warn");
/// ```
#[derive(Debug, Clone)]
pub struct TracingModule {
    level: Level,
    format: TracingFormat,
    env_filter: Option<String>,
    span_events: bool,
}

impl Default for TracingModule {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingFormat::Pretty,
            env_filter: None,
            span_events: false,
        }
    }
}

impl TracingModule {
    /// Creates a module with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets a target filter (`target=level,...`).
    ///
    /// An invalid filter falls back to the configured level.
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Logs span enter and exit.
    #[must_use]
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        match &self.env_filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|err| {
                tracing::warn!(filter = %filter, error = %err, "invalid log filter; using level");
                EnvFilter::new(self.level.as_str())
            }),
            None => EnvFilter::new(self.level.as_str()),
        }
    }
}

impl Module for TracingModule {
    fn build(&self, server: &mut Server) -> Result<(), ServerError> {
        server.insert_global(TracingConfig {
            level: self.level,
            format: self.format,
            env_filter: self.env_filter.clone(),
        });
        Ok(())
    }

    fn ready(&self, _server: &mut Server) -> Result<(), ServerError> {
        let filter = self.filter();
        let span_events = if self.span_events {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        };

        let registry = tracing_subscriber::registry().with(filter);
        let installed = match self.format {
            TracingFormat::Pretty => registry
                .with(tracing_subscriber::fmt::layer().pretty().with_span_events(span_events))
                .try_init(),
            TracingFormat::Compact => registry
                .with(tracing_subscriber::fmt::layer().compact().with_span_events(span_events))
                .try_init(),
            TracingFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json().with_span_events(span_events))
                .try_init(),
        };

        if installed.is_ok() {
            tracing::info!(level = %self.level, format = ?self.format, "logging initialized");
        }
        Ok(())
    }

    fn cleanup(&self, _server: &mut Server) {
        tracing::debug!("logging module shutting down");
    }

    fn name(&self) -> &str {
        "tracing"
    }

    fn dependencies(&self) -> Vec<ModuleId> {
        vec![ModuleId::of::<RuntimeInfoModule>()]
    }
}
