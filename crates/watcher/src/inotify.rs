//! Thin wrapper over the inotify syscalls.

use crate::WatchDescriptor;
use std::ffi::CString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use witness_decoder::EventMask;

/// Registers and removes kernel watches.
///
/// Implemented by [`Inotify`]; the watch table only needs this much of the
/// descriptor, which keeps it testable without a kernel instance.
pub trait WatchBackend {
    /// Add (or replace) a watch on `path`.
    fn add_watch(&self, path: &Path, mask: EventMask) -> io::Result<WatchDescriptor>;

    /// Remove a watch.
    fn rm_watch(&self, wd: WatchDescriptor) -> io::Result<()>;
}

/// An owned, non-blocking inotify descriptor.
///
/// Closed on drop, which also releases every watch registered on it.
#[derive(Debug)]
pub struct Inotify {
    fd: OwnedFd,
}

impl Inotify {
    /// Create a new inotify instance with `IN_NONBLOCK | IN_CLOEXEC`.
    pub fn init() -> io::Result<Self> {
        // SAFETY: inotify_init1 takes no pointers
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: fd was just returned by the kernel and nothing else owns it
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd })
    }

    /// Read pending records into `buf`.
    ///
    /// Returns the number of valid bytes, to be handed to
    /// [`witness_decoder::decode`]. Fails with `WouldBlock` when the queue is
    /// empty.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for writes of buf.len() bytes
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl WatchBackend for Inotify {
    fn add_watch(&self, path: &Path, mask: EventMask) -> io::Result<WatchDescriptor> {
        let c_path = CString::new(path.as_os_str().as_bytes())?;

        // SAFETY: c_path is a valid null-terminated string for the duration of the call
        let wd = unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), c_path.as_ptr(), mask.bits()) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(wd)
    }

    fn rm_watch(&self, wd: WatchDescriptor) -> io::Result<()> {
        // SAFETY: inotify_rm_watch takes no pointers
        let ret = unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), wd) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for Inotify {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Inotify {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
