//! Plugins that run as child processes.
//!
//! Every call spawns the plugin program, writes one JSON request line to its
//! stdin and reads one JSON response line from its stdout:
//!
//! ```text
//! -> {"op":"execute","action":"parse","args":{...}}
//! <- {"rows":[...]}
//! ```
//!
//! Requests are `{"op":"init"}`, `{"op":"execute","action","args"}` and
//! `{"op":"qualifier","qualifier","input":{"type","value"}}`. A non-zero exit
//! code plays the role of the FFI status. Unlike an in-process call, a
//! process call that exceeds its time limit is killed and reaped before the
//! caller sees [`PluginError::Timeout`].
//!
//! [`ProcessHandle`] pairs a plugin with the metadata its `init` call
//! returned; [`PluginHost::load_process`](crate::PluginHost::load_process)
//! claims those names like a library plugin's.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::error::PluginError;
use crate::handle::interpret_result;
use crate::metadata::PluginMetadata;

/// Default limit for one process plugin call.
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(30);

/// A plugin executed out of process.
#[derive(Debug, Clone)]
pub struct ProcessPlugin {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessPlugin {
    /// Creates a process plugin running `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let name = program
            .file_stem()
            .map_or_else(|| "process".to_string(), |stem| stem.to_string_lossy().into_owned());
        Self {
            name,
            program,
            args: Vec::new(),
            timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }

    /// Sets command-line arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the per-call time limit.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the name used in errors and logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The program spawned per call.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command-line arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Per-call time limit.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Asks the plugin for its metadata.
    ///
    /// # Errors
    ///
    /// Process failures, timeouts and invalid metadata.
    pub async fn init(&self) -> Result<PluginMetadata, PluginError> {
        let value = self.call("init", json!({ "op": "init" })).await?;
        PluginMetadata::parse(&self.name, &value.to_string())
    }

    /// Runs `action` in a fresh child process.
    ///
    /// # Errors
    ///
    /// As [`PluginHandle::execute`](crate::PluginHandle::execute), plus I/O
    /// errors and [`PluginError::Timeout`].
    pub async fn execute(&self, action: &str, args: Value) -> Result<Value, PluginError> {
        self.call(
            action,
            json!({ "op": "execute", "action": action, "args": args }),
        )
        .await
    }

    /// Applies `qualifier` in a fresh child process.
    ///
    /// # Errors
    ///
    /// As [`Self::execute`], plus a malformed result when `result` is missing.
    pub async fn qualify(
        &self,
        qualifier: &str,
        value_type: &str,
        value: Value,
    ) -> Result<Value, PluginError> {
        let request = json!({
            "op": "qualifier",
            "qualifier": qualifier,
            "input": { "type": value_type, "value": value },
        });
        let mut answer = self.call(qualifier, request).await?;
        answer
            .get_mut("result")
            .map(Value::take)
            .ok_or_else(|| PluginError::MalformedResult {
                plugin: self.name.clone(),
                call: qualifier.to_string(),
                reason: "missing 'result' field".to_string(),
            })
    }

    async fn call(&self, call: &str, request: Value) -> Result<Value, PluginError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id();
        tracing::debug!(plugin = %self.name, call, pid, "process plugin spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let exchange = async {
            if let Some(mut stdin) = stdin {
                let mut line = request.to_string();
                line.push('\n');
                // A plugin that never reads its input may close stdin early.
                if let Err(err) = stdin.write_all(line.as_bytes()).await
                    && err.kind() != std::io::ErrorKind::BrokenPipe
                {
                    return Err(err);
                }
            }
            let mut response = String::new();
            if let Some(stdout) = stdout {
                BufReader::new(stdout).read_line(&mut response).await?;
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((response, status))
        };

        let (response, status) = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(finished) => finished?,
            Err(_) => {
                // kill() waits for the child, so no zombie is left behind.
                if let Err(err) = child.kill().await {
                    tracing::warn!(plugin = %self.name, pid, error = %err, "failed to kill plugin process");
                }
                tracing::warn!(plugin = %self.name, call, pid, limit = ?self.timeout, "process plugin timed out");
                return Err(PluginError::Timeout {
                    plugin: self.name.clone(),
                    call: call.to_string(),
                    after: self.timeout,
                });
            }
        };

        let code = status.code().unwrap_or(-1);
        let trimmed = response.trim();
        let text = (!trimmed.is_empty()).then_some(trimmed);
        interpret_result(&self.name, call, code, text)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProcessHandle
// ─────────────────────────────────────────────────────────────────────────────

/// An initialized process plugin.
///
/// Each call still runs in a fresh child, so calls need no serialization.
#[derive(Debug)]
pub struct ProcessHandle {
    plugin: ProcessPlugin,
    metadata: PluginMetadata,
}

impl ProcessHandle {
    /// Runs `init` and keeps the declared metadata.
    ///
    /// # Errors
    ///
    /// See [`ProcessPlugin::init`].
    pub async fn initialize(plugin: ProcessPlugin) -> Result<Self, PluginError> {
        let metadata = plugin.init().await?;
        tracing::debug!(
            plugin = plugin.name(),
            services = metadata.services.len(),
            actions = metadata.actions.len(),
            qualifiers = metadata.qualifiers.len(),
            "process plugin initialized"
        );
        Ok(Self { plugin, metadata })
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    /// The underlying plugin.
    #[must_use]
    pub fn plugin(&self) -> &ProcessPlugin {
        &self.plugin
    }

    /// Metadata returned by `init`.
    #[must_use]
    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    /// See [`ProcessPlugin::execute`].
    ///
    /// # Errors
    ///
    /// See [`ProcessPlugin::execute`].
    pub async fn execute(&self, action: &str, args: Value) -> Result<Value, PluginError> {
        self.plugin.execute(action, args).await
    }

    /// See [`ProcessPlugin::qualify`].
    ///
    /// # Errors
    ///
    /// See [`ProcessPlugin::qualify`].
    pub async fn qualify(
        &self,
        qualifier: &str,
        value_type: &str,
        value: Value,
    ) -> Result<Value, PluginError> {
        self.plugin.qualify(qualifier, value_type, value).await
    }

    /// Returns true if `other` spawns the same command line.
    pub(crate) fn runs(&self, other: &ProcessPlugin) -> bool {
        self.plugin.program == other.program && self.plugin.args == other.args
    }
}
