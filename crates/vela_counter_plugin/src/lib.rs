//! A stateful counter plugin.
//!
//! Exports `plugin_init`, `plugin_execute`, `plugin_qualifier` and
//! `plugin_free`. The counter is deliberately updated with a separate load
//! and store, so it stays exact only when the host serializes calls, which
//! it does for plugins that are stateful and not reentrant.
//!
//! Actions (also reachable as `counter.<action>`):
//!
//! | Action | Arguments | Result |
//! |--------|-----------|--------|
//! | `increment` | `{"by": n}` (default 1) | `{"count": n}` |
//! | `get` | none | `{"count": n}` |
//! | `reset` | none | `{"count": 0}` |
//!
//! Qualifier `parity` maps an integer to `"even"` or `"odd"`.

use std::ffi::{CStr, CString, c_char, c_int};
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::{Value, json};

static COUNT: AtomicI64 = AtomicI64::new(0);

const METADATA: &str = r#"{
    "name": "counter",
    "version": "0.0.1",
    "abiVersion": 1,
    "services": [
        { "name": "counter", "symbol": "counter", "methods": ["increment", "get", "reset"] }
    ],
    "actions": [
        { "name": "Increment", "role": "own", "verbs": ["increment", "count"], "prepositions": ["on"] }
    ],
    "qualifiers": [
        { "name": "parity", "inputTypes": ["Integer"], "description": "even or odd" }
    ],
    "stateful": true,
    "reentrant": false
}"#;

fn into_raw(value: &Value) -> *mut c_char {
    CString::new(value.to_string()).map_or(std::ptr::null_mut(), CString::into_raw)
}

fn fail(status: *mut c_int, code: c_int, message: &str) -> *mut c_char {
    if !status.is_null() {
        // SAFETY: non-null status pointers point at a live int owned by the host.
        unsafe { *status = code };
    }
    into_raw(&json!({ "error": message }))
}

/// Reads a host string argument.
///
/// # Safety
///
/// `ptr` must be null or NUL-terminated.
unsafe fn read<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: guaranteed by the caller.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Returns the plugin metadata document.
#[unsafe(no_mangle)]
pub extern "C" fn plugin_init() -> *mut c_char {
    CString::new(METADATA).map_or(std::ptr::null_mut(), CString::into_raw)
}

/// Runs a counter action.
///
/// # Safety
///
/// `action` and `args_json` must be null or NUL-terminated; `status` must be
/// null or point at a writable int.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn plugin_execute(
    action: *const c_char,
    args_json: *const c_char,
    status: *mut c_int,
) -> *mut c_char {
    // SAFETY: forwarded from this function's contract.
    let (Some(action), Some(args)) = (unsafe { read(action) }, unsafe { read(args_json) }) else {
        return fail(status, 1, "action and arguments must be UTF-8 strings");
    };
    let Ok(args) = serde_json::from_str::<Value>(args) else {
        return fail(status, 1, "arguments are not valid JSON");
    };

    let verb = action.strip_prefix("counter.").unwrap_or(action);
    let count = match verb {
        "increment" | "count" => {
            let by = args.get("by").and_then(Value::as_i64).unwrap_or(1);
            let current = COUNT.load(Ordering::SeqCst);
            std::thread::yield_now();
            COUNT.store(current + by, Ordering::SeqCst);
            current + by
        }
        "get" => COUNT.load(Ordering::SeqCst),
        "reset" => {
            COUNT.store(0, Ordering::SeqCst);
            0
        }
        other => return into_raw(&json!({ "error": format!("Unknown action: {other}") })),
    };
    into_raw(&json!({ "count": count }))
}

/// Applies a qualifier to `{"type": ..., "value": ...}`.
///
/// # Safety
///
/// Same contract as [`plugin_execute`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn plugin_qualifier(
    qualifier: *const c_char,
    input_json: *const c_char,
    status: *mut c_int,
) -> *mut c_char {
    // SAFETY: forwarded from this function's contract.
    let (Some(qualifier), Some(input)) = (unsafe { read(qualifier) }, unsafe { read(input_json) })
    else {
        return fail(status, 1, "qualifier and input must be UTF-8 strings");
    };
    let input: Value = serde_json::from_str(input).unwrap_or(Value::Null);

    match (qualifier, input.get("value").and_then(Value::as_i64)) {
        ("parity", Some(n)) => {
            into_raw(&json!({ "result": if n % 2 == 0 { "even" } else { "odd" } }))
        }
        ("parity", None) => fail(status, 2, "parity expects an integer"),
        (other, _) => into_raw(&json!({ "error": format!("Unknown qualifier: {other}") })),
    }
}

/// Releases a string returned by this plugin.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by this plugin and not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn plugin_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        // SAFETY: every pointer this plugin returns comes from CString::into_raw.
        drop(unsafe { CString::from_raw(ptr) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(action: &str, args: &str) -> (c_int, Value) {
        let action = CString::new(action).unwrap();
        let args = CString::new(args).unwrap();
        let mut status = 0;
        // SAFETY: valid strings and status slot; the result is freed below.
        unsafe {
            let raw = plugin_execute(action.as_ptr(), args.as_ptr(), &raw mut status);
            let value = serde_json::from_str(CStr::from_ptr(raw).to_str().unwrap()).unwrap();
            plugin_free(raw);
            (status, value)
        }
    }

    #[test]
    fn metadata_is_valid_json() {
        let raw = plugin_init();
        // SAFETY: plugin_init returns an owned NUL-terminated string.
        let text = unsafe { CStr::from_ptr(raw) }.to_str().unwrap().to_string();
        // SAFETY: raw came from plugin_init.
        unsafe { plugin_free(raw) };
        let metadata: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(metadata["services"][0]["name"], "counter");
    }

    #[test]
    fn unknown_action_reports_error_with_zero_status() {
        let (status, value) = call("explode", "{}");
        assert_eq!(status, 0);
        assert_eq!(value["error"], "Unknown action: explode");
    }

    #[test]
    fn invalid_arguments_set_status() {
        let (status, value) = call("increment", "{not json");
        assert_eq!(status, 1);
        assert!(value["error"].is_string());
    }
}
