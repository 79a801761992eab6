//! Store metrics collection.
//!
//! Request counters, retry counters, and latency histograms for every
//! repository operation, emitted through the `metrics` facade.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total store queries by operation and outcome.
    pub const QUERIES_TOTAL: &str = "store_queries_total";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "store_retries_total";

    /// Query latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "store_latency_seconds";
}

/// Record a completed store query.
pub fn record_query(operation: &str, ok: bool, latency_ms: f64) {
    counter!(
        names::QUERIES_TOTAL,
        "operation" => operation.to_string(),
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::QUERIES_TOTAL.contains("queries"));
        assert!(names::RETRIES_TOTAL.contains("retries"));
        assert!(names::LATENCY_SECONDS.contains("latency"));
    }
}
