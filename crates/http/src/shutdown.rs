//! Process-wide shutdown flag driven by SIGINT/SIGTERM.
//!
//! The signal handler only flips an atomic; reactors observe it between
//! readiness batches and begin their graceful drain. SIGPIPE is ignored so
//! a peer resetting mid-write surfaces as an `EPIPE` write error instead of
//! killing the process.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Installs SIGINT and SIGTERM handlers that request a graceful shutdown.
pub fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Requests shutdown programmatically, as the signal handler would.
pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::SeqCst);
}
