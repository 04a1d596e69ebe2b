use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// The server flips to idle after this long without an accepted request.
const IDLE_AFTER: Duration = Duration::from_secs(600);

/// Lock-free request counters plus idle detection.
///
/// Readers may observe values slightly behind the true maximum; that is
/// fine for reporting.
pub struct Stats {
    pub books_sent: AtomicU64,
    pub images_sent: AtomicU64,
    pub successful_logins: AtomicU64,
    pub wrong_logins: AtomicU64,
    pub banned_rejections: AtomicU64,
    pub requests: AtomicU64,
    unique_clients: DashMap<String, ()>,
    last_activity: Mutex<Instant>,
    pub started: Instant,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            books_sent: AtomicU64::new(0),
            images_sent: AtomicU64::new(0),
            successful_logins: AtomicU64::new(0),
            wrong_logins: AtomicU64::new(0),
            banned_rejections: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            unique_clients: DashMap::new(),
            last_activity: Mutex::new(Instant::now()),
            started: Instant::now(),
        }
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted request from a fingerprinted client.
    pub fn record_request(&self, fingerprint: &str) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.unique_clients.insert(fingerprint.to_string(), ());
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    pub fn unique_clients(&self) -> usize {
        self.unique_clients.len()
    }

    /// True after ten minutes without traffic.
    pub fn is_idle(&self) -> bool {
        self.last_activity
            .lock()
            .map(|last| last.elapsed() > IDLE_AFTER)
            .unwrap_or(false)
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Served {} requests from {} clients: {} books, {} images, logins {} ok / {} failed, {} banned rejections",
            self.requests.load(Ordering::Relaxed),
            self.unique_clients(),
            self.books_sent.load(Ordering::Relaxed),
            self.images_sent.load(Ordering::Relaxed),
            self.successful_logins.load(Ordering::Relaxed),
            self.wrong_logins.load(Ordering::Relaxed),
            self.banned_rejections.load(Ordering::Relaxed),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_unique_clients() {
        let stats = Stats::new();
        stats.record_request("fp-1");
        stats.record_request("fp-1");
        stats.record_request("fp-2");
        assert_eq!(stats.requests.load(Ordering::Relaxed), 3);
        assert_eq!(stats.unique_clients(), 2);
        stats.books_sent.fetch_add(1, Ordering::Relaxed);
        assert_eq!(stats.books_sent.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_not_idle_after_recent_request() {
        let stats = Stats::new();
        stats.record_request("fp");
        assert!(!stats.is_idle());
    }
}
