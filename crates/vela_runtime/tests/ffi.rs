//! The C boundary driven the way an embedding program would.

use core::ffi::{CStr, c_char, c_int, c_void};
use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};
use vela_runtime::ffi::{
    VELA_ERROR, VELA_INVALID_ARGUMENT, VELA_OK, vela_runtime_free, vela_runtime_invoke_handler,
    vela_runtime_new, vela_runtime_register_handler, vela_runtime_request_shutdown,
    vela_runtime_run, vela_string_free,
};

const CONFIG: &CStr = c"{\"workerThreads\": 2, \"handleSignals\": false, \"shutdownGraceMs\": 100}";

static REPLY: &CStr = c"{\"sum\": 3}";
static FAILURE: &CStr = c"{\"error\": \"bad input\"}";

/// Returns a fixed reply and counts calls through `user_data`.
unsafe extern "C" fn add(args: *const c_char, user_data: *mut c_void) -> *const c_char {
    // SAFETY: the test registers a pointer to a live AtomicUsize.
    let calls = unsafe { &*user_data.cast::<AtomicUsize>() };
    calls.fetch_add(1, Ordering::SeqCst);
    // SAFETY: the runtime passes a NUL-terminated JSON string.
    let args: Value = serde_json::from_str(unsafe { CStr::from_ptr(args) }.to_str().unwrap()).unwrap();
    assert_eq!(args, json!({"a": 1, "b": 2}));
    REPLY.as_ptr()
}

unsafe extern "C" fn reject(_args: *const c_char, _user_data: *mut c_void) -> *const c_char {
    FAILURE.as_ptr()
}

/// Takes ownership of a returned string and parses it.
fn take_json(ptr: *mut c_char) -> Value {
    assert!(!ptr.is_null());
    // SAFETY: `ptr` was returned by the runtime and is freed exactly once.
    let value = serde_json::from_str(unsafe { CStr::from_ptr(ptr) }.to_str().unwrap()).unwrap();
    // SAFETY: as above.
    unsafe { vela_string_free(ptr) };
    value
}

#[test]
fn handler_round_trip_through_the_c_boundary() {
    let calls = AtomicUsize::new(0);
    let user_data = (&raw const calls).cast_mut().cast::<c_void>();
    let add_name = CString::new("add").unwrap();
    let reject_name = CString::new("reject").unwrap();
    let args = CString::new(r#"{"a": 1, "b": 2}"#).unwrap();

    // SAFETY: every pointer below is valid for the duration of each call and
    // the runtime is freed once at the end.
    unsafe {
        let rt = vela_runtime_new(CONFIG.as_ptr());
        assert!(!rt.is_null());

        assert_eq!(
            vela_runtime_register_handler(rt, add_name.as_ptr(), Some(add), user_data),
            VELA_OK
        );
        assert_eq!(
            vela_runtime_register_handler(rt, add_name.as_ptr(), Some(add), user_data),
            VELA_ERROR
        );
        assert_eq!(
            vela_runtime_register_handler(rt, reject_name.as_ptr(), Some(reject), core::ptr::null_mut()),
            VELA_OK
        );
        assert_eq!(
            vela_runtime_register_handler(rt, add_name.as_ptr(), None, user_data),
            VELA_INVALID_ARGUMENT
        );

        let mut status: c_int = -1;
        let reply = vela_runtime_invoke_handler(rt, add_name.as_ptr(), args.as_ptr(), &raw mut status);
        assert_eq!(status, VELA_OK);
        assert_eq!(take_json(reply), json!({"sum": 3}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let reply = vela_runtime_invoke_handler(rt, reject_name.as_ptr(), core::ptr::null(), &raw mut status);
        assert_eq!(status, VELA_ERROR);
        let error = take_json(reply);
        assert!(error["error"].as_str().unwrap().contains("bad input"), "{error}");

        let unknown = CString::new("unknown").unwrap();
        let reply = vela_runtime_invoke_handler(rt, unknown.as_ptr(), core::ptr::null(), core::ptr::null_mut());
        assert!(take_json(reply)["error"].is_string());

        vela_runtime_request_shutdown(rt);
        assert_eq!(vela_runtime_run(rt), VELA_OK);
        vela_runtime_free(rt);
    }
}

#[test]
fn invalid_configuration_yields_null() {
    let bad = c"{\"workerThreads\": 0}";
    let unknown = c"{\"colour\": \"blue\"}";
    // SAFETY: valid NUL-terminated strings; null results need no cleanup.
    unsafe {
        assert!(vela_runtime_new(bad.as_ptr()).is_null());
        assert!(vela_runtime_new(unknown.as_ptr()).is_null());
        vela_runtime_free(core::ptr::null_mut());
        vela_string_free(core::ptr::null_mut());
        assert_eq!(vela_runtime_run(core::ptr::null()), VELA_INVALID_ARGUMENT);
    }
}
