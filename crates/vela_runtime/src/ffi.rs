//! C-callable embedding boundary.
//!
//! These functions are the only way non-Rust code drives a runtime. A
//! compiled program's entry point typically:
//!
//! 1. creates a runtime with [`vela_runtime_new`]
//! 2. registers its feature sets with [`vela_runtime_register_handler`]
//! 3. blocks in [`vela_runtime_run`] until SIGINT/SIGTERM or
//!    [`vela_runtime_request_shutdown`]
//! 4. releases the runtime with [`vela_runtime_free`]
//!
//! [`vela_runtime_invoke_handler`] runs a named handler through the
//! synchronous bridge from any thread.
//!
//! # Ownership
//!
//! Strings returned by this module are allocated by the runtime and must be
//! released with [`vela_string_free`], never with the caller's allocator.
//! Strings returned by a handler callback stay owned by the callback side;
//! the runtime copies them before the callback returns control.

use core::ffi::{CStr, c_char, c_int, c_void};
use std::ffi::CString;

use serde_json::{Value, json};
use vela_events::HandlerError;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::runtime::Runtime;

/// Success.
pub const VELA_OK: c_int = 0;
/// Failure; details are logged or returned as JSON.
pub const VELA_ERROR: c_int = 1;
/// A required pointer argument was null or not UTF-8.
pub const VELA_INVALID_ARGUMENT: c_int = 2;

/// Opaque runtime handle given to C callers.
pub struct VelaRuntime {
    runtime: Runtime,
}

/// A handler implemented on the C side.
///
/// Receives the JSON arguments and the `user_data` given at registration.
/// Returns a JSON string owned by the callback side, or null on failure. A
/// result object with a top-level `"error"` string is also a failure.
pub type VelaHandlerFn =
    unsafe extern "C" fn(args_json: *const c_char, user_data: *mut c_void) -> *const c_char;

struct Callback {
    f: VelaHandlerFn,
    user_data: *mut c_void,
}

// SAFETY: the registrant guarantees that `f` may be called from any thread
// with `user_data`, which is the documented contract of
// `vela_runtime_register_handler`.
unsafe impl Send for Callback {}
// SAFETY: see `Send`; the callback is only ever called, never mutated.
unsafe impl Sync for Callback {}

impl Callback {
    /// Calls the C function and copies its result.
    fn call(&self, name: &str, args: &Value) -> Result<Value, HandlerError> {
        let args = CString::new(args.to_string())
            .map_err(|_| HandlerError::failed("arguments contain a NUL byte"))?;
        // SAFETY: `args` is a valid NUL-terminated string for the duration of
        // the call; `f` and `user_data` follow the registration contract.
        let result = unsafe { (self.f)(args.as_ptr(), self.user_data) };
        if result.is_null() {
            return Err(HandlerError::failed(format!("handler '{name}' returned null")));
        }
        // SAFETY: a non-null result is a NUL-terminated string owned by the
        // callback side and valid until we return to it.
        let text = unsafe { CStr::from_ptr(result) }
            .to_str()
            .map_err(|_| HandlerError::failed(format!("handler '{name}' returned invalid UTF-8")))?;
        let value: Value = serde_json::from_str(text)?;
        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return Err(HandlerError::failed(message));
        }
        Ok(value)
    }
}

fn into_c_string(text: String) -> *mut c_char {
    // JSON serialization escapes NUL, so this only fails on foreign input.
    CString::new(text).map_or(core::ptr::null_mut(), CString::into_raw)
}

/// Reads an optional C string argument.
///
/// # Safety
///
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn read_str<'a>(ptr: *const c_char) -> Option<Result<&'a str, RuntimeError>> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per this function's contract.
    let text = unsafe { CStr::from_ptr(ptr) };
    Some(
        text.to_str()
            .map_err(|_| RuntimeError::invalid_config("argument", "not valid UTF-8")),
    )
}

/// Creates a runtime.
///
/// `config_json` may be null for the defaults overlaid with `VELA_*`
/// environment variables, or a JSON object such as
/// `{"workerThreads": 4, "shutdownGraceMs": 2000}`. Returns null on failure
/// (the reason is logged).
///
/// # Safety
///
/// `config_json` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vela_runtime_new(config_json: *const c_char) -> *mut VelaRuntime {
    // SAFETY: forwarded caller contract.
    let config = match unsafe { read_str(config_json) } {
        None => RuntimeConfig::from_env(),
        Some(Ok(json)) => RuntimeConfig::from_json(json),
        Some(Err(err)) => Err(err),
    };
    match config.and_then(Runtime::new) {
        Ok(runtime) => Box::into_raw(Box::new(VelaRuntime { runtime })),
        Err(err) => {
            tracing::error!(error = %err, "vela_runtime_new failed");
            core::ptr::null_mut()
        }
    }
}

/// Destroys a runtime. Null is ignored.
///
/// # Safety
///
/// `rt` must be null or a pointer returned by [`vela_runtime_new`] that was
/// not freed yet, and no other thread may be using it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vela_runtime_free(rt: *mut VelaRuntime) {
    if rt.is_null() {
        return;
    }
    // SAFETY: ownership returns to Rust exactly once per the contract.
    drop(unsafe { Box::from_raw(rt) });
}

/// Runs the event loop until shutdown. Returns [`VELA_OK`] on a clean stop.
///
/// # Safety
///
/// `rt` must be a live pointer from [`vela_runtime_new`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vela_runtime_run(rt: *const VelaRuntime) -> c_int {
    // SAFETY: live pointer per the contract.
    let Some(rt) = (unsafe { rt.as_ref() }) else {
        return VELA_INVALID_ARGUMENT;
    };
    match rt.runtime.run_event_loop_blocking() {
        Ok(_) => VELA_OK,
        Err(err) => {
            tracing::error!(error = %err, "vela_runtime_run failed");
            VELA_ERROR
        }
    }
}

/// Requests shutdown. Idempotent; callable from any thread.
///
/// # Safety
///
/// `rt` must be a live pointer from [`vela_runtime_new`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vela_runtime_request_shutdown(rt: *const VelaRuntime) {
    // SAFETY: live pointer per the contract.
    if let Some(rt) = unsafe { rt.as_ref() } {
        rt.runtime.request_shutdown();
    }
}

/// Registers a C handler under `name`.
///
/// Returns [`VELA_OK`], [`VELA_ERROR`] if the name is taken, or
/// [`VELA_INVALID_ARGUMENT`].
///
/// # Safety
///
/// `rt` must be a live pointer from [`vela_runtime_new`] and `name` a valid
/// NUL-terminated string. `callback` must be safe to call from any runtime
/// thread with `user_data` for as long as the runtime lives.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vela_runtime_register_handler(
    rt: *const VelaRuntime,
    name: *const c_char,
    callback: Option<VelaHandlerFn>,
    user_data: *mut c_void,
) -> c_int {
    // SAFETY: live pointer per the contract.
    let Some(rt) = (unsafe { rt.as_ref() }) else {
        return VELA_INVALID_ARGUMENT;
    };
    // SAFETY: forwarded caller contract.
    let (Some(Ok(name)), Some(f)) = (unsafe { read_str(name) }, callback) else {
        return VELA_INVALID_ARGUMENT;
    };

    let callback = std::sync::Arc::new(Callback { f, user_data });
    let handler_name = name.to_string();
    let registered = rt.runtime.handlers().register(name, move |ctx| {
        let callback = std::sync::Arc::clone(&callback);
        let name = handler_name.clone();
        let args = ctx.input().clone();
        async move {
            // Foreign code may block; keep it off the async workers.
            tokio::task::spawn_blocking(move || callback.call(&name, &args))
                .await
                .map_err(|err| HandlerError::Panicked(err.to_string()))?
        }
    });
    match registered {
        Ok(()) => VELA_OK,
        Err(err) => {
            tracing::error!(error = %err, "vela_runtime_register_handler failed");
            VELA_ERROR
        }
    }
}

/// Runs handler `name` with `args_json` and blocks for its result.
///
/// Returns a JSON string to release with [`vela_string_free`]. On success
/// `*status` is [`VELA_OK`] and the string is the handler result; on failure
/// `*status` is non-zero and the string is `{"error": "..."}`. `status` may
/// be null. A null `args_json` means `null`.
///
/// # Safety
///
/// `rt` must be a live pointer from [`vela_runtime_new`]; `name` and
/// `args_json` valid NUL-terminated strings (or null for `args_json`);
/// `status` null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vela_runtime_invoke_handler(
    rt: *const VelaRuntime,
    name: *const c_char,
    args_json: *const c_char,
    status: *mut c_int,
) -> *mut c_char {
    let set_status = |code: c_int| {
        if !status.is_null() {
            // SAFETY: non-null status is writable per the contract.
            unsafe { status.write(code) };
        }
    };

    // SAFETY: live pointer per the contract.
    let Some(rt) = (unsafe { rt.as_ref() }) else {
        set_status(VELA_INVALID_ARGUMENT);
        return into_c_string(json!({ "error": "null runtime" }).to_string());
    };
    // SAFETY: forwarded caller contract.
    let name = match unsafe { read_str(name) } {
        Some(Ok(name)) => name,
        _ => {
            set_status(VELA_INVALID_ARGUMENT);
            return into_c_string(json!({ "error": "invalid handler name" }).to_string());
        }
    };
    // SAFETY: forwarded caller contract.
    let args = match unsafe { read_str(args_json) } {
        None => Ok(Value::Null),
        Some(Ok(text)) => serde_json::from_str(text).map_err(RuntimeError::from),
        Some(Err(err)) => Err(err),
    };

    match args.and_then(|args| rt.runtime.invoke_handler(name, args)) {
        Ok(value) => {
            set_status(VELA_OK);
            into_c_string(value.to_string())
        }
        Err(err) => {
            tracing::warn!(handler = name, error = %err, "bridged handler failed");
            set_status(VELA_ERROR);
            into_c_string(json!({ "error": err.to_string() }).to_string())
        }
    }
}

/// Releases a string returned by this module. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or a string returned by this module that was not
/// freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vela_string_free(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: the pointer came from `CString::into_raw` per the contract.
    drop(unsafe { CString::from_raw(ptr) });
}
