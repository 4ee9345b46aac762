//! Reserve file descriptor for EMFILE resilience.
//!
//! Each worker keeps one descriptor open to `/dev/null`. When `accept`
//! fails with `EMFILE` the reserve is closed to free a slot, one pending
//! connection is accepted and immediately closed (draining the backlog and
//! signaling the client instead of leaving the SYN hanging), and the
//! reserve is reopened. Without this the accept loop stays wedged at the
//! process fd limit while the backlog sits full.

use crate::metrics::metrics;
use std::os::fd::RawFd;
use tracing::warn;

pub(crate) struct ReserveFd {
    fd: RawFd,
}

impl ReserveFd {
    pub(crate) fn new() -> Self {
        let mut guard = Self { fd: -1 };
        guard.reopen();
        guard
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.fd >= 0
    }

    /// Runs one recovery cycle against `listener_fd`. Returns whether the
    /// reserve slot was available to spend.
    pub(crate) fn recover(&mut self, listener_fd: RawFd) -> bool {
        if self.fd < 0 {
            return false;
        }

        unsafe { libc::close(self.fd) };
        self.fd = -1;

        let conn = unsafe {
            libc::accept4(
                listener_fd,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        };
        if conn >= 0 {
            unsafe { libc::close(conn) };
        }

        self.reopen();
        metrics().count_recovery();
        true
    }

    fn reopen(&mut self) {
        let path = b"/dev/null\0".as_ptr() as *const libc::c_char;
        self.fd = unsafe { libc::open(path, libc::O_RDONLY | libc::O_CLOEXEC) };
        if self.fd < 0 {
            warn!("failed to reopen the reserve descriptor");
        }
    }
}

impl Drop for ReserveFd {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
        }
    }
}
