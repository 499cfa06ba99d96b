// =============================================================================
// Rate-Limit Tracker — stay under the exchange's request-weight budget
// =============================================================================
//
// Binance enforces a request weight of 1200/min and order caps of 10/10s and
// 200 000/day. The client feeds every response's `X-MBX-USED-WEIGHT-1M` and
// `X-MBX-ORDER-COUNT-*` headers into atomic counters; trade calls pre-flight
// against a conservative hard cap before touching the wire.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

/// Hard ceiling at which requests are refused (exchange limit is 1200).
const WEIGHT_HARD_LIMIT: u32 = 1000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 800;
/// Orders per 10-second window.
const ORDER_10S_LIMIT: u32 = 10;

/// Atomic counters fed from exchange response headers.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    order_count_10s: AtomicU32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            order_count_10s: AtomicU32::new(0),
        }
    }

    /// Update counters from the response headers of the last call.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        if let Some(w) = header_u32(headers, "X-MBX-USED-WEIGHT-1M") {
            let prev = self.used_weight_1m.swap(w, Ordering::Relaxed);
            if w >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
                warn!(
                    used_weight = w,
                    hard_limit = WEIGHT_HARD_LIMIT,
                    "request weight crossed warning threshold"
                );
            }
            debug!(used_weight_1m = w, "rate-limit weight updated");
        }

        if let Some(c) = header_u32(headers, "X-MBX-ORDER-COUNT-10S") {
            self.order_count_10s.store(c, Ordering::Relaxed);
        }
    }

    /// True if another request of `weight` fits under the hard cap.
    pub fn can_send_request(&self, weight: u32) -> bool {
        let current = self.used_weight_1m.load(Ordering::Relaxed);
        let allowed = current + weight <= WEIGHT_HARD_LIMIT;
        if !allowed {
            warn!(
                current_weight = current,
                requested_weight = weight,
                "request refused — would exceed weight budget"
            );
        }
        allowed
    }

    /// True if another order fits under the 10-second order cap.
    pub fn can_place_order(&self) -> bool {
        let count = self.order_count_10s.load(Ordering::Relaxed);
        if count >= ORDER_10S_LIMIT {
            warn!(count, limit = ORDER_10S_LIMIT, "order refused — 10s cap reached");
            return false;
        }
        true
    }

    /// Count an order locally before the exchange echoes updated headers.
    pub fn record_order_sent(&self) {
        self.order_count_10s.fetch_add(1, Ordering::Relaxed);
    }
}

fn header_u32(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u32> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .parse::<u32>()
        .ok()
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
            .field("order_count_10s", &self.order_count_10s.load(Ordering::Relaxed))
            .finish()
    }
}
