//! A loaded plugin.

use std::ffi::{CString, c_int};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::abi::{ExecuteFn, PluginVTable};
use crate::buffer::PluginBuffer;
use crate::error::PluginError;
use crate::library::PluginLibrary;
use crate::metadata::PluginMetadata;

/// One initialized plugin.
///
/// Created once per library by the [`PluginHost`](crate::PluginHost) and
/// shared as `Arc<PluginHandle>`. Calls are blocking; [`Self::execute_async`]
/// moves them to the blocking pool. When the plugin's metadata marks it
/// stateful and not reentrant, calls through the handle are serialized by a
/// per-handle lock.
pub struct PluginHandle {
    name: String,
    path: PathBuf,
    vtable: PluginVTable,
    metadata: PluginMetadata,
    call_lock: Option<Mutex<()>>,
    calls: AtomicU64,
}

impl core::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("serialized", &self.call_lock.is_some())
            .field("calls", &self.calls())
            .finish()
    }
}

impl PluginHandle {
    /// Calls `plugin_init` and builds the handle from its metadata.
    ///
    /// # Errors
    ///
    /// Returns a contract violation when `plugin_init` returns null or an
    /// invalid document.
    pub fn initialize(library: &PluginLibrary) -> Result<Self, PluginError> {
        let vtable = library.vtable();
        let fallback = library
            .path()
            .file_stem()
            .map(|stem| {
                let stem = stem.to_string_lossy();
                stem.strip_prefix("lib").unwrap_or(&stem).to_string()
            })
            .unwrap_or_else(|| "plugin".to_string());

        // SAFETY: `PluginLibrary` guarantees `init` follows the contract; the
        // returned pointer is owned by the buffer and freed with the plugin's
        // own `free`.
        let buffer = unsafe { PluginBuffer::from_raw((vtable.init)(), vtable.free) };
        let buffer = buffer.ok_or_else(|| PluginError::InvalidMetadata {
            plugin: fallback.clone(),
            reason: "plugin_init returned null".to_string(),
        })?;
        let text = buffer.to_str().map_err(|err| PluginError::InvalidMetadata {
            plugin: fallback.clone(),
            reason: err.to_string(),
        })?;
        let metadata = PluginMetadata::parse(&fallback, text)?;
        drop(buffer);

        let name = metadata.name.clone().unwrap_or(fallback);
        tracing::info!(
            plugin = %name,
            version = metadata.version.as_deref().unwrap_or("unversioned"),
            services = metadata.services.len(),
            actions = metadata.actions.len(),
            qualifiers = metadata.qualifiers.len(),
            serialized = metadata.serialize_calls(),
            "plugin initialized"
        );

        Ok(Self {
            call_lock: metadata.serialize_calls().then(|| Mutex::new(())),
            name,
            path: library.path().to_path_buf(),
            vtable,
            metadata,
            calls: AtomicU64::new(0),
        })
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Library path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata returned by `plugin_init`.
    #[must_use]
    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    /// Number of calls made through this handle.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Runs `action` with `args` on the calling thread.
    ///
    /// # Errors
    ///
    /// See [`PluginError`]: plugin failures (non-zero status or an `error`
    /// result) and contract violations (null or malformed results).
    pub fn execute(&self, action: &str, args: &Value) -> Result<Value, PluginError> {
        self.call(self.vtable.execute, action, &args.to_string())
    }

    /// Applies `qualifier` to a value of type `value_type`.
    ///
    /// The plugin receives `{"type": value_type, "value": value}` and answers
    /// `{"result": ...}`; the unwrapped result is returned.
    ///
    /// # Errors
    ///
    /// As [`Self::execute`], plus a malformed result when `result` is missing.
    pub fn qualify(
        &self,
        qualifier: &str,
        value_type: &str,
        value: &Value,
    ) -> Result<Value, PluginError> {
        let input = json!({ "type": value_type, "value": value }).to_string();
        let mut answer = self.call(self.vtable.qualifier, qualifier, &input)?;
        answer
            .get_mut("result")
            .map(Value::take)
            .ok_or_else(|| PluginError::MalformedResult {
                plugin: self.name.clone(),
                call: qualifier.to_string(),
                reason: "missing 'result' field".to_string(),
            })
    }

    /// Runs `action` on the blocking pool, optionally bounded by `timeout`.
    ///
    /// A timed-out in-process call cannot be interrupted: the caller gets
    /// [`PluginError::Timeout`] immediately while the call finishes in the
    /// background and its result buffer is freed when it returns.
    ///
    /// # Errors
    ///
    /// As [`Self::execute`], plus [`PluginError::Timeout`].
    pub async fn execute_async(
        self: &Arc<Self>,
        action: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, PluginError> {
        let handle = Arc::clone(self);
        let owned = action.to_string();
        self.blocking(action, timeout, move || handle.execute(&owned, &args))
            .await
    }

    /// [`Self::qualify`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// As [`Self::qualify`], plus [`PluginError::Timeout`].
    pub async fn qualify_async(
        self: &Arc<Self>,
        qualifier: &str,
        value_type: &str,
        value: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, PluginError> {
        let handle = Arc::clone(self);
        let (owned, value_type) = (qualifier.to_string(), value_type.to_string());
        self.blocking(qualifier, timeout, move || {
            handle.qualify(&owned, &value_type, &value)
        })
        .await
    }

    async fn blocking<F>(
        &self,
        call: &str,
        timeout: Option<Duration>,
        work: F,
    ) -> Result<Value, PluginError>
    where
        F: FnOnce() -> Result<Value, PluginError> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(work);
        let joined = match timeout {
            Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                tracing::warn!(plugin = %self.name, call, ?limit, "plugin call timed out");
                PluginError::Timeout {
                    plugin: self.name.clone(),
                    call: call.to_string(),
                    after: limit,
                }
            })?,
            None => task.await,
        };
        joined.map_err(|err| PluginError::CallAborted(err.to_string()))?
    }

    fn call(&self, entry: ExecuteFn, name: &str, input: &str) -> Result<Value, PluginError> {
        let name_c = CString::new(name)
            .map_err(|_| PluginError::InvalidArgument(format!("'{name}' contains a NUL byte")))?;
        let input_c = CString::new(input)
            .map_err(|_| PluginError::InvalidArgument("payload contains a NUL byte".to_string()))?;

        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut status: c_int = 0;
        let raw = {
            let _serialized = self.call_lock.as_ref().map(Mutex::lock);
            // SAFETY: both strings are NUL-terminated and outlive the call;
            // `status` is a live, initialized int the plugin may overwrite.
            unsafe { entry(name_c.as_ptr(), input_c.as_ptr(), &raw mut status) }
        };
        // SAFETY: per the contract the result is null or owned by the plugin
        // and released only through its `free`.
        let buffer = unsafe { PluginBuffer::from_raw(raw, self.vtable.free) };
        let text = match &buffer {
            Some(buffer) => Some(buffer.to_str().map_err(|err| PluginError::MalformedResult {
                plugin: self.name.clone(),
                call: name.to_string(),
                reason: err.to_string(),
            })?),
            None => None,
        };

        let outcome = interpret_result(&self.name, name, status, text);
        if let Err(err) = &outcome {
            tracing::debug!(plugin = %self.name, call = name, error = %err, "plugin call failed");
        }
        outcome
    }
}

/// Maps a raw `(status, text)` pair from any plugin transport to a result.
pub(crate) fn interpret_result(
    plugin: &str,
    call: &str,
    status: i32,
    text: Option<&str>,
) -> Result<Value, PluginError> {
    let Some(text) = text else {
        return Err(if status == 0 {
            PluginError::NullResult {
                plugin: plugin.to_string(),
                call: call.to_string(),
            }
        } else {
            PluginError::Status {
                plugin: plugin.to_string(),
                call: call.to_string(),
                status,
                message: None,
            }
        });
    };

    let parsed = serde_json::from_str::<Value>(text);
    if status != 0 {
        let message = match &parsed {
            Ok(value) => error_message(value).or_else(|| Some(value.to_string())),
            Err(_) => Some(text.to_string()),
        };
        return Err(PluginError::Status {
            plugin: plugin.to_string(),
            call: call.to_string(),
            status,
            message,
        });
    }

    let value = parsed.map_err(|err| PluginError::MalformedResult {
        plugin: plugin.to_string(),
        call: call.to_string(),
        reason: err.to_string(),
    })?;
    if let Some(message) = error_message(&value) {
        return Err(PluginError::Reported {
            plugin: plugin.to_string(),
            call: call.to_string(),
            message,
        });
    }
    Ok(value)
}

fn error_message(value: &Value) -> Option<String> {
    match value.as_object()?.get("error")? {
        Value::String(message) => Some(message.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::counter_plugin;

    counter_plugin!(fixture, r#"{"name": "fixture", "qualifiers": [{"name": "doubled"}]}"#);
    counter_plugin!(counting, r#"{"name": "counting"}"#);

    fn handle_for(vtable: PluginVTable) -> PluginHandle {
        // SAFETY: the fixtures implement the plugin contract.
        let library = unsafe { PluginLibrary::from_vtable("/fixtures/libfixture.so", vtable) };
        PluginHandle::initialize(&library).unwrap()
    }

    fn handle() -> PluginHandle {
        handle_for(fixture::vtable())
    }

    #[test]
    fn status_wins_over_body() {
        let err = interpret_result("p", "a", 3, Some(r#"{"error": "bad"}"#)).unwrap_err();
        assert!(matches!(
            err,
            PluginError::Status { status: 3, ref message, .. } if message.as_deref() == Some("bad")
        ));
    }

    #[test]
    fn error_object_with_zero_status_is_a_failure() {
        let err = interpret_result("p", "a", 0, Some(r#"{"error": "nope"}"#)).unwrap_err();
        assert!(err.is_plugin_failure());
    }

    #[test]
    fn null_and_garbage_are_contract_violations() {
        assert!(interpret_result("p", "a", 0, None).unwrap_err().is_contract_violation());
        assert!(
            interpret_result("p", "a", 0, Some("not json"))
                .unwrap_err()
                .is_contract_violation()
        );
    }

    #[test]
    fn executes_and_frees_every_buffer() {
        let handle = handle_for(counting::vtable());
        assert_eq!(handle.name(), "counting");
        assert!(handle.metadata().serialize_calls());

        handle.execute("reset", &Value::Null).unwrap();
        let first = handle.execute("increment", &json!({})).unwrap();
        let second = handle.execute("increment", &json!({"by": 2})).unwrap();
        assert_eq!(first, json!({"count": 1}));
        assert_eq!(second, json!({"count": 3}));

        assert!(handle.execute("fail", &Value::Null).unwrap_err().is_plugin_failure());
        assert!(handle.execute("garbage", &Value::Null).unwrap_err().is_contract_violation());
        assert!(matches!(
            handle.execute("null", &Value::Null),
            Err(PluginError::NullResult { .. })
        ));
        assert_eq!(counting::live_buffers(), 0);
    }

    #[test]
    fn unnamed_plugin_is_named_after_its_file() {
        counter_plugin!(anonymous, "{}");
        let handle = handle_for(anonymous::vtable());
        assert_eq!(handle.name(), "fixture");
    }

    #[test]
    fn qualifier_result_is_unwrapped() {
        let handle = handle();
        assert_eq!(handle.qualify("doubled", "Integer", &json!(21)).unwrap(), json!(42));
        assert!(handle.qualify("missing", "Integer", &json!(1)).is_err());
    }

    #[test]
    fn nul_in_action_is_rejected_before_the_call() {
        let handle = handle();
        let calls = handle.calls();
        assert!(matches!(
            handle.execute("bad\0name", &Value::Null),
            Err(PluginError::InvalidArgument(_))
        ));
        assert_eq!(handle.calls(), calls);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_call_times_out() {
        let handle = Arc::new(handle());
        let err = handle
            .execute_async("sleep", json!({"ms": 500}), Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
