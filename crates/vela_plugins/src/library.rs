//! Dynamic library loading.
//!
//! [`LibraryLoader`] is the seam between the host and the platform loader.
//! [`DlopenLoader`] resolves the four entry points with `dlopen`/`dlsym`.
//! Loaded libraries stay mapped for the life of the process, so a function
//! pointer held by an in-flight call can never dangle.

use std::path::{Path, PathBuf};

use crate::abi::PluginVTable;
use crate::error::PluginError;

/// A library whose entry points have been resolved.
#[derive(Debug, Clone)]
pub struct PluginLibrary {
    path: PathBuf,
    vtable: PluginVTable,
}

impl PluginLibrary {
    /// Wraps already resolved entry points.
    ///
    /// # Safety
    ///
    /// The four functions must implement the plugin contract: return null or
    /// NUL-terminated strings releasable by `free`, accept NUL-terminated
    /// inputs, and remain callable for the life of the process.
    #[must_use]
    pub unsafe fn from_vtable(path: impl Into<PathBuf>, vtable: PluginVTable) -> Self {
        Self {
            path: path.into(),
            vtable,
        }
    }

    /// Path the library was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolved entry points.
    #[must_use]
    pub fn vtable(&self) -> PluginVTable {
        self.vtable
    }
}

/// Opens plugin libraries.
pub trait LibraryLoader: Send + Sync + 'static {
    /// Opens the library at `path` (already canonical) and resolves its
    /// entry points.
    fn open(&self, path: &Path) -> Result<PluginLibrary, PluginError>;
}

/// Platform loader backed by `dlopen`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DlopenLoader;

#[cfg(unix)]
impl LibraryLoader for DlopenLoader {
    fn open(&self, path: &Path) -> Result<PluginLibrary, PluginError> {
        use std::ffi::{CStr, CString};
        use std::os::unix::ffi::OsStrExt;

        use crate::abi::{
            EXECUTE_SYMBOL, ExecuteFn, FREE_SYMBOL, FreeFn, INIT_SYMBOL, InitFn, QUALIFIER_SYMBOL,
            QualifierFn, symbol_name,
        };

        let path_c = CString::new(path.as_os_str().as_bytes()).map_err(|_| PluginError::Load {
            path: path.to_path_buf(),
            reason: "path contains a NUL byte".to_string(),
        })?;

        // SAFETY: path_c is a valid NUL-terminated string. Loading runs the
        // library's initializers, which the operator trusts by configuring it.
        let handle = unsafe { libc::dlopen(path_c.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            // SAFETY: dlerror returns a thread-local message or null.
            let message = unsafe { libc::dlerror() };
            let reason = if message.is_null() {
                "unknown dlopen error".to_string()
            } else {
                // SAFETY: non-null dlerror results are NUL-terminated.
                unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
            };
            return Err(PluginError::Load {
                path: path.to_path_buf(),
                reason,
            });
        }

        let resolve = |symbol: &'static [u8]| {
            // SAFETY: handle is a live dlopen handle and symbol is NUL-terminated.
            let address = unsafe { libc::dlsym(handle, symbol.as_ptr().cast()) };
            if address.is_null() {
                Err(PluginError::MissingSymbol {
                    path: path.to_path_buf(),
                    symbol: symbol_name(symbol),
                })
            } else {
                Ok(address)
            }
        };

        let resolved = (|| {
            Ok::<_, PluginError>((
                resolve(INIT_SYMBOL)?,
                resolve(EXECUTE_SYMBOL)?,
                resolve(QUALIFIER_SYMBOL)?,
                resolve(FREE_SYMBOL)?,
            ))
        })();
        let (init, execute, qualifier, free) = match resolved {
            Ok(symbols) => symbols,
            Err(err) => {
                // SAFETY: nothing from this handle has been called yet.
                unsafe { libc::dlclose(handle) };
                return Err(err);
            }
        };

        // SAFETY: the exported symbols are declared by the plugin contract with
        // exactly these C signatures.
        let vtable = unsafe {
            PluginVTable {
                init: std::mem::transmute::<*mut libc::c_void, InitFn>(init),
                execute: std::mem::transmute::<*mut libc::c_void, ExecuteFn>(execute),
                qualifier: std::mem::transmute::<*mut libc::c_void, QualifierFn>(qualifier),
                free: std::mem::transmute::<*mut libc::c_void, FreeFn>(free),
            }
        };

        tracing::debug!(path = %path.display(), "plugin library loaded");
        // SAFETY: the handle is never closed, so the vtable stays valid.
        Ok(unsafe { PluginLibrary::from_vtable(path, vtable) })
    }
}

#[cfg(not(unix))]
impl LibraryLoader for DlopenLoader {
    fn open(&self, path: &Path) -> Result<PluginLibrary, PluginError> {
        Err(PluginError::Unsupported(format!(
            "dynamic plugins are not supported on this platform ({})",
            path.display()
        )))
    }
}
