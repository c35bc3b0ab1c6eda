use crate::traits::Metrics;

/// Emits every increment as a `trace` event under the `cached_caller::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl Metrics for TracingMetrics {
    fn increment(&self, counter: &'static str, n: u64) {
        tracing::trace!(target: "cached_caller::metrics", counter, n, "metric");
    }
}
