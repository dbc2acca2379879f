//! Single-owner guard for plugin-allocated strings.

use std::ffi::{CStr, c_char};
use std::ptr::NonNull;

use crate::abi::FreeFn;

/// A string allocated by a plugin and owned by the host until dropped.
///
/// Dropping the buffer hands the pointer back to the plugin's `plugin_free`
/// exactly once. The host allocator never touches it.
pub struct PluginBuffer {
    ptr: NonNull<c_char>,
    free: FreeFn,
}

impl core::fmt::Debug for PluginBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.as_c_str().to_bytes().len())
            .finish()
    }
}

impl PluginBuffer {
    /// Takes ownership of a pointer returned by a plugin entry point.
    ///
    /// Returns `None` for a null pointer; nothing is freed in that case.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a NUL-terminated string returned by the plugin
    /// whose `plugin_free` is `free`, and must not be freed by anyone else.
    pub unsafe fn from_raw(ptr: *mut c_char, free: FreeFn) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, free })
    }

    /// The buffer contents, without the terminating NUL.
    #[must_use]
    pub fn as_c_str(&self) -> &CStr {
        // SAFETY: `from_raw` requires a NUL-terminated string that stays
        // valid until `plugin_free` runs in `drop`.
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }
    }

    /// The contents as UTF-8, if valid.
    pub fn to_str(&self) -> Result<&str, core::str::Utf8Error> {
        self.as_c_str().to_str()
    }
}

impl Drop for PluginBuffer {
    fn drop(&mut self) {
        // SAFETY: the pointer came from this plugin and is released exactly
        // once, here, with the plugin's own free function.
        unsafe { (self.free)(self.ptr.as_ptr()) };
    }
}
