//! Symbol names and function pointer types of the plugin contract.

use std::ffi::{c_char, c_int};

/// Version of the binary contract implemented by this host.
///
/// A plugin may declare `"abiVersion"` in its metadata; any value other than
/// this one is rejected at load time.
pub const ABI_VERSION: u32 = 1;

/// `plugin_init` symbol name (NUL-terminated for `dlsym`).
pub const INIT_SYMBOL: &[u8] = b"plugin_init\0";
/// `plugin_execute` symbol name.
pub const EXECUTE_SYMBOL: &[u8] = b"plugin_execute\0";
/// `plugin_qualifier` symbol name.
pub const QUALIFIER_SYMBOL: &[u8] = b"plugin_qualifier\0";
/// `plugin_free` symbol name.
pub const FREE_SYMBOL: &[u8] = b"plugin_free\0";

/// Returns the printable name of a NUL-terminated symbol constant.
#[must_use]
pub fn symbol_name(symbol: &'static [u8]) -> &'static str {
    let trimmed = symbol.strip_suffix(b"\0").unwrap_or(symbol);
    core::str::from_utf8(trimmed).unwrap_or("<invalid symbol>")
}

/// `char* plugin_init(void)`
pub type InitFn = unsafe extern "C" fn() -> *mut c_char;

/// `char* plugin_execute(const char* action, const char* args_json, int* status)`
pub type ExecuteFn =
    unsafe extern "C" fn(*const c_char, *const c_char, *mut c_int) -> *mut c_char;

/// `char* plugin_qualifier(const char* qualifier, const char* input_json, int* status)`
pub type QualifierFn =
    unsafe extern "C" fn(*const c_char, *const c_char, *mut c_int) -> *mut c_char;

/// `void plugin_free(char* ptr)`
pub type FreeFn = unsafe extern "C" fn(*mut c_char);

/// The four resolved entry points of one plugin.
#[derive(Debug, Clone, Copy)]
pub struct PluginVTable {
    /// Returns the metadata document.
    pub init: InitFn,
    /// Runs an action.
    pub execute: ExecuteFn,
    /// Applies a qualifier.
    pub qualifier: QualifierFn,
    /// Releases a pointer returned by any of the above.
    pub free: FreeFn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_names_are_printable() {
        assert_eq!(symbol_name(INIT_SYMBOL), "plugin_init");
        assert_eq!(symbol_name(EXECUTE_SYMBOL), "plugin_execute");
        assert_eq!(symbol_name(QUALIFIER_SYMBOL), "plugin_qualifier");
        assert_eq!(symbol_name(FREE_SYMBOL), "plugin_free");
    }
}
