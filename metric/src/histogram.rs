use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::Duration,
};

/// Bucket boundaries for a [`DurationHistogram`].
#[derive(Debug, Clone)]
pub struct DurationHistogramOptions {
    buckets: Arc<[Duration]>,
}

impl DurationHistogramOptions {
    /// Build from explicit, ascending bucket upper bounds.
    pub fn new(buckets: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            buckets: buckets.into_iter().collect(),
        }
    }
}

impl Default for DurationHistogramOptions {
    fn default() -> Self {
        Self::new([
            Duration::from_millis(1),
            Duration::from_millis(10),
            Duration::from_millis(100),
            Duration::from_secs(1),
            Duration::from_secs(10),
        ])
    }
}

/// A histogram of durations, used to time store writes, query compilation and execution.
#[derive(Debug, Clone, Default)]
pub struct DurationHistogram(Arc<Mutex<Inner>>);

#[derive(Debug, Default)]
struct Inner {
    counts: Vec<u64>,
    sum: Duration,
    options: Option<DurationHistogramOptions>,
}

impl DurationHistogram {
    /// Record one observation.
    pub fn record(&self, value: Duration) {
        let mut inner = self.0.lock();
        if inner.options.is_none() {
            let opts = DurationHistogramOptions::default();
            inner.counts = vec![0; opts.buckets.len() + 1];
            inner.options = Some(opts);
        }
        let opts = inner.options.clone().expect("initialised above");
        let bucket = opts
            .buckets
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(opts.buckets.len());
        inner.counts[bucket] += 1;
        inner.sum += value;
    }

    /// Total number of observations recorded.
    pub fn count(&self) -> u64 {
        self.0.lock().counts.iter().sum()
    }

    /// Sum of all recorded durations, for computing an average.
    pub fn sum(&self) -> Duration {
        self.0.lock().sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_sums() {
        let h = DurationHistogram::default();
        h.record(Duration::from_millis(5));
        h.record(Duration::from_millis(50));
        assert_eq!(h.count(), 2);
        assert_eq!(h.sum(), Duration::from_millis(55));
    }
}
