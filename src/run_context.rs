//! Immutable run identity plus a small synchronized counter (§9, "Global run
//! state"). Avoids process-wide mutable singletons: every component that
//! needs the run id or the stop thresholds is handed an `Arc<RunContext>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};

pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    started_instant: Instant,
    stop_after_products: Option<u64>,
    stop_after_minutes: Option<u64>,
    products_committed: AtomicU64,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, stop_after_products: Option<u64>, stop_after_minutes: Option<u64>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            started_instant: Instant::now(),
            stop_after_products,
            stop_after_minutes,
            products_committed: AtomicU64::new(0),
        }
    }

    /// Records one committed product and returns the new running total.
    pub fn record_product(&self) -> u64 {
        self.products_committed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn products_committed(&self) -> u64 {
        self.products_committed.load(Ordering::SeqCst)
    }

    /// `true` once either global stop threshold has been crossed (§4.8 step 6,
    /// §5 "soft cancellations at category boundaries").
    pub fn should_stop(&self) -> bool {
        if let Some(max) = self.stop_after_products
            && self.products_committed() >= max
        {
            return true;
        }
        if let Some(minutes) = self.stop_after_minutes {
            let elapsed = self.started_instant.elapsed().as_secs() / 60;
            if elapsed >= minutes {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_after_product_threshold_reached() {
        let ctx = RunContext::new("run-1", Some(2), None);
        assert!(!ctx.should_stop());
        ctx.record_product();
        assert!(!ctx.should_stop());
        ctx.record_product();
        assert!(ctx.should_stop());
    }

    #[test]
    fn no_threshold_never_stops() {
        let ctx = RunContext::new("run-1", None, None);
        for _ in 0..100 {
            ctx.record_product();
        }
        assert!(!ctx.should_stop());
    }
}
