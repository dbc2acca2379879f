//! Runtime metadata published as a global resource.

use chrono::{DateTime, Utc};
use serde::Serialize;
use vela_system::module::Module;
use vela_system::resource::GlobalResource;
use vela_system::server::{Server, ServerError};

/// Metadata about the running host.
///
/// Read-only; installed by [`RuntimeInfoModule`] and read through
/// `server.get_global::<RuntimeInfo>()`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    /// Runtime version from `Cargo.toml`.
    pub version: &'static str,
    /// Whether the host was compiled with debug assertions.
    pub debug: bool,
    /// Target operating system.
    pub os: &'static str,
    /// Target architecture.
    pub arch: &'static str,
    /// Host process id.
    pub pid: u32,
    /// When the module was built.
    pub started_at: DateTime<Utc>,
}

impl GlobalResource for RuntimeInfo {}

impl Default for RuntimeInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            debug: cfg!(debug_assertions),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }
}

/// Installs [`RuntimeInfo`].
///
/// Has no dependencies; most ambient modules depend on it.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeInfoModule;

impl Module for RuntimeInfoModule {
    fn build(&self, server: &mut Server) -> Result<(), ServerError> {
        server.insert_global(RuntimeInfo::default());
        Ok(())
    }

    fn name(&self) -> &str {
        "runtime-info"
    }
}
