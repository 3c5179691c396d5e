use hdrhistogram::Histogram;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Metrics collector for engine and shard activity.
///
/// Latencies are kept per operation name in HDR histograms (microseconds),
/// everything else is a relaxed atomic counter.
#[derive(Default)]
pub struct Metrics {
    operation_latencies: Mutex<HashMap<String, Histogram<u64>>>,
    throughput: AtomicU64,
    fsync_count: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    gc_runs: AtomicU64,
    shard_opens: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn latencies(&self) -> MutexGuard<'_, HashMap<String, Histogram<u64>>> {
        self.operation_latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_latency(&self, operation: &str, duration: Duration) {
        let mut latencies = self.latencies();
        let histogram = match latencies.entry(operation.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match Histogram::<u64>::new(3) {
                Ok(histogram) => entry.insert(histogram),
                Err(_) => return,
            },
        };

        let micros = duration.as_micros() as u64;
        let _ = histogram.record(micros);
    }

    pub fn increment_throughput(&self) {
        self.throughput.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fsync(&self) {
        self.fsync_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_gc_runs(&self) {
        self.gc_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_shard_opens(&self) {
        self.shard_opens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_percentiles(&self, operation: &str) -> (f64, f64, f64) {
        let latencies = self.latencies();
        match latencies.get(operation) {
            Some(histogram) => percentiles(histogram),
            None => (0.0, 0.0, 0.0),
        }
    }

    pub fn get_throughput(&self) -> u64 {
        self.throughput.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> MetricsReport {
        let operation_latencies = self
            .latencies()
            .iter()
            .map(|(op, histogram)| (op.clone(), percentiles(histogram)))
            .collect();

        MetricsReport {
            throughput: self.throughput.load(Ordering::Relaxed),
            fsync_count: self.fsync_count.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            gc_runs: self.gc_runs.load(Ordering::Relaxed),
            shard_opens: self.shard_opens.load(Ordering::Relaxed),
            operation_latencies,
        }
    }
}

fn percentiles(histogram: &Histogram<u64>) -> (f64, f64, f64) {
    (
        histogram.value_at_quantile(0.50) as f64,
        histogram.value_at_quantile(0.95) as f64,
        histogram.value_at_quantile(0.99) as f64,
    )
}

#[derive(Debug)]
pub struct MetricsReport {
    pub throughput: u64,
    pub fsync_count: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub gc_runs: u64,
    pub shard_opens: u64,
    pub operation_latencies: HashMap<String, (f64, f64, f64)>, // (p50, p95, p99)
}

impl MetricsReport {
    /// Fraction of value lookups served from the cache.
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}
