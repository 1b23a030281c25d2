// =============================================================================
// Rate-Limit Tracker — monitors Binance API usage to avoid 429s
// =============================================================================
//
// Binance enforces a request-weight budget per rolling minute. Every scan
// fans out one klines request per symbol, so a large universe burns weight
// quickly.
//
// The tracker reads the `X-MBX-USED-WEIGHT-1M` response header after every
// request and keeps an atomic counter that any task may query lock-free. A
// reading older than one minute is treated as expired, otherwise a blocked
// client would never see a fresh header again.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Hard ceiling at which we refuse to send additional requests.
const WEIGHT_HARD_LIMIT: u32 = 1000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 800;
/// Binance resets the weight counter every minute.
const WEIGHT_WINDOW: Duration = Duration::from_secs(60);

/// Thread-safe rate-limit tracker backed by an atomic counter.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    updated_at: Mutex<Option<Instant>>,
}

impl RateLimitTracker {
    /// Create a new tracker with the counter at zero.
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            updated_at: Mutex::new(None),
        }
    }

    /// Update the counter from the HTTP response headers returned by Binance.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let Some(w) = headers
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };

        self.record_weight(w);
    }

    fn record_weight(&self, w: u32) {
        let prev = self.used_weight_1m.swap(w, Ordering::Relaxed);
        *self.updated_at.lock() = Some(Instant::now());

        if w >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = w,
                hard_limit = WEIGHT_HARD_LIMIT,
                "rate-limit weight crossed warning threshold"
            );
        }
        debug!(used_weight_1m = w, "rate-limit weight updated from header");
    }

    /// Current weight, or zero once the last reading has aged out.
    pub fn current_weight(&self) -> u32 {
        match *self.updated_at.lock() {
            Some(at) if at.elapsed() < WEIGHT_WINDOW => self.used_weight_1m.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// Return `true` if we can afford to spend `weight` more request weight
    /// without exceeding the hard limit.
    pub fn can_send_request(&self, weight: u32) -> bool {
        let current = self.current_weight();
        let allowed = current.saturating_add(weight) <= WEIGHT_HARD_LIMIT;
        if !allowed {
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked — would exceed rate-limit"
            );
        }
        allowed
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight_1m.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn header_updates_weight() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("X-MBX-USED-WEIGHT-1M", HeaderValue::from_static("420"));
        tracker.update_from_headers(&headers);
        assert_eq!(tracker.current_weight(), 420);
    }

    #[test]
    fn malformed_header_is_ignored() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("X-MBX-USED-WEIGHT-1M", HeaderValue::from_static("lots"));
        tracker.update_from_headers(&headers);
        assert_eq!(tracker.current_weight(), 0);
    }

    #[test]
    fn blocks_requests_past_hard_limit() {
        let tracker = RateLimitTracker::new();
        tracker.record_weight(990);
        assert!(tracker.can_send_request(10));
        assert!(!tracker.can_send_request(11));
    }

    #[test]
    fn huge_header_value_blocks_instead_of_wrapping() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("X-MBX-USED-WEIGHT-1M", HeaderValue::from_static("4294967295"));
        tracker.update_from_headers(&headers);
        assert_eq!(tracker.current_weight(), u32::MAX);
        assert!(!tracker.can_send_request(2));
    }

    #[test]
    fn stale_weight_expires() {
        let tracker = RateLimitTracker::new();
        tracker.record_weight(1000);
        *tracker.updated_at.lock() = Instant::now().checked_sub(Duration::from_secs(61));
        assert_eq!(tracker.current_weight(), 0);
        assert!(tracker.can_send_request(20));
    }
}
