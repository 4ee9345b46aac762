//! Process-global counters for accept resilience and connection teardown.
//!
//! All counters are relaxed atomics; they are the only state shared across
//! reactors besides the listening sockets themselves.

use std::sync::atomic::{AtomicU64, Ordering};

/// Accept failures bucketed by errno, plus reserve-descriptor recoveries.
#[derive(Debug)]
pub struct AcceptMetrics {
    pub emfile: AtomicU64,
    pub enfile: AtomicU64,
    pub enomem: AtomicU64,
    pub enobufs: AtomicU64,
    pub other: AtomicU64,
    pub recovered: AtomicU64,
}

/// Connection close counts bucketed by reason.
#[derive(Debug)]
pub struct CloseMetrics {
    pub read_error: AtomicU64,
    pub read_eof: AtomicU64,
    pub parse_error: AtomicU64,
    pub write_error: AtomicU64,
    pub close_header: AtomicU64,
    pub idle_timeout: AtomicU64,
}

#[derive(Debug)]
pub struct Metrics {
    pub accept: AcceptMetrics,
    pub close: CloseMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ReadError,
    ReadEof,
    ParseError,
    WriteError,
    CloseHeader,
    IdleTimeout,
}

static METRICS: Metrics = Metrics {
    accept: AcceptMetrics {
        emfile: AtomicU64::new(0),
        enfile: AtomicU64::new(0),
        enomem: AtomicU64::new(0),
        enobufs: AtomicU64::new(0),
        other: AtomicU64::new(0),
        recovered: AtomicU64::new(0),
    },
    close: CloseMetrics {
        read_error: AtomicU64::new(0),
        read_eof: AtomicU64::new(0),
        parse_error: AtomicU64::new(0),
        write_error: AtomicU64::new(0),
        close_header: AtomicU64::new(0),
        idle_timeout: AtomicU64::new(0),
    },
};

pub fn metrics() -> &'static Metrics {
    &METRICS
}

impl Metrics {
    /// Classifies an accept errno into its bucket.
    pub fn count_accept_error(&self, errno: i32) {
        let counter = match errno {
            libc::EMFILE => &self.accept.emfile,
            libc::ENFILE => &self.accept.enfile,
            libc::ENOMEM => &self.accept.enomem,
            libc::ENOBUFS => &self.accept.enobufs,
            _ => &self.accept.other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_recovery(&self) {
        self.accept.recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_close(&self, reason: CloseReason) {
        let counter = match reason {
            CloseReason::ReadError => &self.close.read_error,
            CloseReason::ReadEof => &self.close.read_eof,
            CloseReason::ParseError => &self.close.parse_error,
            CloseReason::WriteError => &self.close.write_error,
            CloseReason::CloseHeader => &self.close.close_header,
            CloseReason::IdleTimeout => &self.close.idle_timeout,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            accept_emfile: load(&self.accept.emfile),
            accept_enfile: load(&self.accept.enfile),
            accept_enomem: load(&self.accept.enomem),
            accept_enobufs: load(&self.accept.enobufs),
            accept_other: load(&self.accept.other),
            emfile_recoveries: load(&self.accept.recovered),
            close_read_error: load(&self.close.read_error),
            close_read_eof: load(&self.close.read_eof),
            close_parse_error: load(&self.close.parse_error),
            close_write_error: load(&self.close.write_error),
            close_close_header: load(&self.close.close_header),
            close_idle_timeout: load(&self.close.idle_timeout),
        }
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub accept_emfile: u64,
    pub accept_enfile: u64,
    pub accept_enomem: u64,
    pub accept_enobufs: u64,
    pub accept_other: u64,
    pub emfile_recoveries: u64,
    pub close_read_error: u64,
    pub close_read_eof: u64,
    pub close_parse_error: u64,
    pub close_write_error: u64,
    pub close_close_header: u64,
    pub close_idle_timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_errors_bucketed_by_errno() {
        let before = metrics().snapshot();
        metrics().count_accept_error(libc::EMFILE);
        metrics().count_accept_error(libc::ENFILE);
        metrics().count_accept_error(libc::ECONNABORTED);
        let after = metrics().snapshot();

        // Other tests in the process may touch the same counters; only the
        // lower bound is stable.
        assert!(after.accept_emfile >= before.accept_emfile + 1);
        assert!(after.accept_enfile >= before.accept_enfile + 1);
        assert!(after.accept_other >= before.accept_other + 1);
    }

    #[test]
    fn close_reasons_counted() {
        let before = metrics().snapshot();
        metrics().count_close(CloseReason::CloseHeader);
        metrics().count_close(CloseReason::ReadEof);
        let after = metrics().snapshot();

        assert!(after.close_close_header >= before.close_close_header + 1);
        assert!(after.close_read_eof >= before.close_read_eof + 1);
    }
}
