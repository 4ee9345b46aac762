//! Cached `Date` header value.
//!
//! Formatting an IMF-fixdate on every response is measurable at high request
//! rates; a background thread refreshes a shared value twice a second and
//! responses clone the current `HeaderValue` (a cheap refcount bump).

use arc_swap::ArcSwap;
use http::HeaderValue;
use httpdate::fmt_http_date;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

pub struct DateService {
    current: Arc<ArcSwap<HeaderValue>>,
    stop: Arc<AtomicBool>,
}

impl DateService {
    pub fn new() -> Self {
        let current = Arc::new(ArcSwap::from_pointee(format_now()));
        let stop = Arc::new(AtomicBool::new(false));

        let current_arc = Arc::clone(&current);
        let stop_flag = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("peregrine-date".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::sleep(REFRESH_INTERVAL);
                    current_arc.store(Arc::new(format_now()));
                }
            })
            .expect("spawning the date refresher thread");

        DateService { current, stop }
    }

    /// Calls `f` with the current date header value.
    pub fn with_http_date<F>(&self, mut f: F)
    where
        F: FnMut(&HeaderValue),
    {
        let value = self.current.load();
        f(&value)
    }

    pub fn header_value(&self) -> HeaderValue {
        HeaderValue::clone(&self.current.load())
    }
}

impl Default for DateService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DateService {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn format_now() -> HeaderValue {
    let http_date = fmt_http_date(SystemTime::now());
    HeaderValue::try_from(http_date).expect("http_date should not fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_imf_fixdate() {
        let service = DateService::new();
        let value = service.header_value();
        let s = value.to_str().unwrap();
        // e.g. "Sun, 06 Nov 1994 08:49:37 GMT"
        assert!(s.ends_with(" GMT"));
        assert_eq!(s.len(), 29);
    }
}
