use std::sync::atomic::{AtomicU64, Ordering};

/// Request counters, exported as Prometheus text on `/metrics`.
#[derive(Debug, Default)]
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    /// Requests that waited on another request's in-flight transform
    pub coalesced: AtomicU64,
    pub transforms: AtomicU64,
    pub fetch_errors: AtomicU64,
    pub errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, help, counter) in [
            ("cache_hits_total", "Total number of cache hits", &self.cache_hits),
            ("cache_misses_total", "Total number of cache misses", &self.cache_misses),
            ("coalesced_total", "Requests served by another request's transform", &self.coalesced),
            ("transforms_total", "Total number of image transformations", &self.transforms),
            ("fetch_errors_total", "Total number of failed source fetches", &self.fetch_errors),
            ("errors_total", "Total number of failed requests", &self.errors),
        ] {
            out.push_str(&format!(
                "# HELP webp_proxy_{name} {help}\n# TYPE webp_proxy_{name} counter\nwebp_proxy_{name} {}\n",
                Self::get(counter)
            ));
        }
        out
    }
}
