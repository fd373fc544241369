//! Per-error-code counters.
//!
//! A process-local counter map, enabled by `ENABLE_METRICS`. Constructed
//! explicitly in each binary and passed to the loops; there is no global
//! registry.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug)]
pub struct Metrics {
    enabled: bool,
    counts: Mutex<HashMap<&'static str, u64>>,
}

impl Metrics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Count one occurrence of an error code. No-op when disabled.
    pub fn record(&self, code: &'static str) {
        if !self.enabled {
            return;
        }
        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(code).or_insert(0) += 1;
        }
    }

    /// Current counter values, for shutdown summaries and tests.
    pub fn snapshot(&self) -> HashMap<&'static str, u64> {
        self.counts
            .lock()
            .map(|counts| counts.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_per_code() {
        let metrics = Metrics::new(true);
        metrics.record("PROVIDER");
        metrics.record("PROVIDER");
        metrics.record("BROKER");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.get("PROVIDER"), Some(&2));
        assert_eq!(snapshot.get("BROKER"), Some(&1));
    }

    #[test]
    fn test_disabled_metrics_record_nothing() {
        let metrics = Metrics::new(false);
        metrics.record("PROVIDER");
        assert!(metrics.snapshot().is_empty());
    }
}
