//! Event-driven backend on Linux `inotify`.

use std::ffi::{CString, OsStr};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tokio::io::unix::AsyncFd;
use tokio_util::sync::CancellationToken;
use vela_events::EventBus;

use super::{FileChange, FileChangeKind};

const WATCH_MASK: u32 = libc::IN_CREATE
    | libc::IN_CLOSE_WRITE
    | libc::IN_DELETE
    | libc::IN_DELETE_SELF
    | libc::IN_MOVED_FROM
    | libc::IN_MOVED_TO;

/// One inotify instance watching one path.
pub(crate) struct Watcher {
    fd: AsyncFd<OwnedFd>,
    root: PathBuf,
}

impl Watcher {
    /// Starts watching `root`. Must be called inside a tokio runtime.
    pub(crate) fn new(root: &Path) -> io::Result<Self> {
        // SAFETY: plain syscall without pointer arguments.
        let raw = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let path_c = CString::new(root.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
        // SAFETY: `fd` is a live inotify descriptor and `path_c` is NUL-terminated.
        let wd = unsafe { libc::inotify_add_watch(fd.as_raw_fd(), path_c.as_ptr(), WATCH_MASK) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            fd: AsyncFd::new(fd)?,
            root: root.to_path_buf(),
        })
    }

    async fn next_batch(&self, buf: &mut [u8]) -> io::Result<Vec<FileChange>> {
        loop {
            let mut guard = self.fd.readable().await?;
            let read = guard.try_io(|inner| {
                // SAFETY: `buf` is writable for `buf.len()` bytes and the
                // descriptor is open for the lifetime of `inner`.
                let n = unsafe { libc::read(inner.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n.unsigned_abs())
                }
            });
            match read {
                Ok(result) => {
                    let len = result?;
                    return Ok(self.parse(&buf[..len]));
                }
                Err(_would_block) => {}
            }
        }
    }

    fn parse(&self, bytes: &[u8]) -> Vec<FileChange> {
        let header = size_of::<libc::inotify_event>();
        let mut changes = Vec::new();
        let mut offset = 0;
        while offset + header <= bytes.len() {
            // SAFETY: the header lies within `bytes` (checked above);
            // `read_unaligned` places no alignment requirement on the source.
            let event: libc::inotify_event =
                unsafe { std::ptr::read_unaligned(bytes.as_ptr().add(offset).cast()) };
            let name_start = offset + header;
            let name_end = (name_start + event.len as usize).min(bytes.len());
            let name = bytes[name_start..name_end]
                .split(|byte| *byte == 0)
                .next()
                .unwrap_or_default();
            offset = name_end;

            let path = if name.is_empty() {
                self.root.clone()
            } else {
                self.root.join(OsStr::from_bytes(name))
            };
            if let Some(kind) = change_kind(event.mask) {
                changes.push(FileChange::new(kind, path));
            }
        }
        changes
    }
}

fn change_kind(mask: u32) -> Option<FileChangeKind> {
    if mask & (libc::IN_CREATE | libc::IN_MOVED_TO) != 0 {
        Some(FileChangeKind::Created)
    } else if mask & libc::IN_CLOSE_WRITE != 0 {
        Some(FileChangeKind::Modified)
    } else if mask & (libc::IN_DELETE | libc::IN_DELETE_SELF | libc::IN_MOVED_FROM) != 0 {
        Some(FileChangeKind::Deleted)
    } else {
        None
    }
}

/// Publishes kernel-reported changes until cancelled.
pub(crate) async fn run(watcher: Watcher, bus: EventBus, token: CancellationToken) {
    let mut buf = vec![0_u8; 8192];
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            batch = watcher.next_batch(&mut buf) => match batch {
                Ok(changes) => {
                    for change in changes {
                        if token.is_cancelled() {
                            break;
                        }
                        bus.publish(change.into_event());
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %watcher.root.display(), error = %err, "inotify read failed");
                    break;
                }
            },
        }
    }
    tracing::debug!(path = %watcher.root.display(), "inotify watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_map_to_changes() {
        assert_eq!(change_kind(libc::IN_CREATE), Some(FileChangeKind::Created));
        assert_eq!(change_kind(libc::IN_MOVED_TO), Some(FileChangeKind::Created));
        assert_eq!(change_kind(libc::IN_CLOSE_WRITE), Some(FileChangeKind::Modified));
        assert_eq!(change_kind(libc::IN_DELETE), Some(FileChangeKind::Deleted));
        assert_eq!(change_kind(libc::IN_ACCESS), None);
    }
}
