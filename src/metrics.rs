use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

/// What one request did, reported after it completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionSummary {
    pub operation_name: Option<String>,
    pub duration: Duration,
    pub fetch_count: usize,
    pub failed_fetches: usize,
    pub cache_hits: usize,
    pub error_count: usize,
    pub cancelled: bool,
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn report(&self, summary: &ExecutionSummary);
}

/// Emits each summary as a structured log event.
pub struct TracingMetricsSink;

#[async_trait]
impl MetricsSink for TracingMetricsSink {
    async fn report(&self, summary: &ExecutionSummary) {
        info!(
            operation = summary.operation_name.as_deref().unwrap_or("<anonymous>"),
            duration_ms = summary.duration.as_millis() as u64,
            fetches = summary.fetch_count,
            failed_fetches = summary.failed_fetches,
            cache_hits = summary.cache_hits,
            errors = summary.error_count,
            cancelled = summary.cancelled,
            "request completed"
        );
    }
}

pub struct NoopMetricsSink;

#[async_trait]
impl MetricsSink for NoopMetricsSink {
    async fn report(&self, _summary: &ExecutionSummary) {}
}
