//! In-process plugin fixtures for tests.
//!
//! [`counter_plugin!`] defines a module of `extern "C"` functions that honor
//! the plugin contract, each invocation with its own state.
//! [`StaticLoader`] serves such vtables to a [`PluginHost`](crate::PluginHost)
//! in place of `dlopen`.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::abi::PluginVTable;
use crate::error::PluginError;
use crate::library::{LibraryLoader, PluginLibrary};

/// Defines `mod $name` with a counter plugin implemented in-process.
///
/// The module exposes `vtable()`, `count()` and `live_buffers()` (buffers
/// handed out and not yet freed). Actions, with or without a `"symbol."`
/// prefix:
///
/// - `increment` (`{"by": n}`, default 1), `get`, `reset` answer `{"count": n}`
/// - `echo` returns its arguments
/// - `sleep` (`{"ms": n}`) blocks, then answers `{"slept": n}`
/// - `fail` sets status 7, `garbage` returns non-JSON, `null` returns null
///
/// The qualifier `doubled` multiplies an integer by two.
#[doc(hidden)]
#[macro_export]
macro_rules! __counter_plugin {
    ($name:ident, $metadata:expr) => {
        #[allow(dead_code, reason = "fixtures expose more entry points than one test uses")]
        mod $name {
            use ::std::ffi::{CStr, CString, c_char, c_int};
            use ::std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

            use $crate::__private::serde_json::{self, Value, json};

            static COUNT: AtomicI64 = AtomicI64::new(0);
            static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
            static FREED: AtomicUsize = AtomicUsize::new(0);

            pub fn vtable() -> $crate::abi::PluginVTable {
                $crate::abi::PluginVTable {
                    init,
                    execute,
                    qualifier,
                    free,
                }
            }

            pub fn count() -> i64 {
                COUNT.load(Ordering::SeqCst)
            }

            pub fn live_buffers() -> usize {
                ALLOCATED.load(Ordering::SeqCst) - FREED.load(Ordering::SeqCst)
            }

            fn out(text: String) -> *mut c_char {
                match CString::new(text) {
                    Ok(text) => {
                        ALLOCATED.fetch_add(1, Ordering::SeqCst);
                        text.into_raw()
                    }
                    Err(_) => ::std::ptr::null_mut(),
                }
            }

            fn read(ptr: *const c_char) -> String {
                // SAFETY: the host passes NUL-terminated strings.
                unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
            }

            unsafe extern "C" fn init() -> *mut c_char {
                out($metadata.to_string())
            }

            unsafe extern "C" fn execute(
                action: *const c_char,
                args: *const c_char,
                status: *mut c_int,
            ) -> *mut c_char {
                let action = read(action);
                let args: Value = serde_json::from_str(&read(args)).unwrap_or(Value::Null);
                let verb = action.rsplit('.').next().unwrap_or_default();
                let answer = match verb {
                    "increment" => {
                        let by = args.get("by").and_then(Value::as_i64).unwrap_or(1);
                        // Read-modify-write in two steps: only serialized
                        // calls keep the count exact.
                        let current = COUNT.load(Ordering::SeqCst);
                        ::std::thread::yield_now();
                        COUNT.store(current + by, Ordering::SeqCst);
                        json!({ "count": current + by })
                    }
                    "get" => json!({ "count": COUNT.load(Ordering::SeqCst) }),
                    "reset" => {
                        COUNT.store(0, Ordering::SeqCst);
                        json!({ "count": 0 })
                    }
                    "echo" => args,
                    "sleep" => {
                        let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
                        ::std::thread::sleep(::std::time::Duration::from_millis(ms));
                        json!({ "slept": ms })
                    }
                    "fail" => {
                        // SAFETY: the host passes a live status slot.
                        unsafe { *status = 7 };
                        json!({ "error": "requested failure" })
                    }
                    "garbage" => return out("not json".to_string()),
                    "null" => return ::std::ptr::null_mut(),
                    _ => json!({ "error": format!("Unknown action: {action}") }),
                };
                out(answer.to_string())
            }

            unsafe extern "C" fn qualifier(
                name: *const c_char,
                input: *const c_char,
                _status: *mut c_int,
            ) -> *mut c_char {
                let input: Value = serde_json::from_str(&read(input)).unwrap_or(Value::Null);
                let answer = match read(name).as_str() {
                    "doubled" => match input.get("value").and_then(Value::as_i64) {
                        Some(value) => json!({ "result": value * 2 }),
                        None => json!({ "error": "doubled expects an integer" }),
                    },
                    other => json!({ "error": format!("Unknown qualifier: {other}") }),
                };
                out(answer.to_string())
            }

            unsafe extern "C" fn free(ptr: *mut c_char) {
                if !ptr.is_null() {
                    FREED.fetch_add(1, Ordering::SeqCst);
                    // SAFETY: every non-null pointer handed out came from
                    // CString::into_raw in `out`.
                    drop(unsafe { CString::from_raw(ptr) });
                }
            }
        }
    };
}

pub use crate::__counter_plugin as counter_plugin;

/// A [`LibraryLoader`] that serves registered vtables instead of loading
/// files.
#[derive(Default)]
pub struct StaticLoader {
    libraries: Mutex<HashMap<PathBuf, PluginVTable>>,
}

impl core::fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StaticLoader")
            .field("libraries", &self.libraries.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StaticLoader {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `vtable` for `path`.
    ///
    /// The path is canonicalized when it exists, matching what the host
    /// passes to [`LibraryLoader::open`].
    ///
    /// # Safety
    ///
    /// `vtable` must implement the plugin contract.
    pub unsafe fn insert(&self, path: impl AsRef<Path>, vtable: PluginVTable) {
        let path = path.as_ref();
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.libraries.lock().insert(key, vtable);
    }
}

impl LibraryLoader for StaticLoader {
    fn open(&self, path: &Path) -> Result<PluginLibrary, PluginError> {
        let vtable = self
            .libraries
            .lock()
            .get(path)
            .copied()
            .ok_or_else(|| PluginError::Load {
                path: path.to_path_buf(),
                reason: "no static library registered".to_string(),
            })?;
        // SAFETY: `insert` requires contract-conforming vtables.
        Ok(unsafe { PluginLibrary::from_vtable(path, vtable) })
    }
}
