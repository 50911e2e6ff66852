use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Handoff delivery counters
#[derive(Debug, Default)]
pub struct HandoffMetrics {
    pub attempts: AtomicU64,
    pub accepted: AtomicU64,
    pub retryable_failures: AtomicU64,
    pub fatal_failures: AtomicU64,
    pub duplicates: AtomicU64,
    pub contended: AtomicU64,
}

impl HandoffMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempts(&self, attempts: u32) {
        self.attempts.fetch_add(u64::from(attempts), Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retryable_failure(&self) {
        self.retryable_failures.fetch_add(1, Ordering::Relaxed);
        warn!("Handoff retry budget exhausted");
    }

    pub fn record_fatal_failure(&self) {
        self.fatal_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Handoff requested for an agreement that was already transferred
    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// Handoff skipped because another emitter holds the claim
    pub fn record_contended(&self) {
        self.contended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> HandoffStats {
        HandoffStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            retryable_failures: self.retryable_failures.load(Ordering::Relaxed),
            fatal_failures: self.fatal_failures.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Handoff metrics: attempts={}, accepted={}, retryable={}, fatal={}, duplicates={}, contended={}",
            stats.attempts,
            stats.accepted,
            stats.retryable_failures,
            stats.fatal_failures,
            stats.duplicates,
            stats.contended
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffStats {
    pub attempts: u64,
    pub accepted: u64,
    pub retryable_failures: u64,
    pub fatal_failures: u64,
    pub duplicates: u64,
    pub contended: u64,
}

/// Create correlated spans for agreement workflow operations
pub fn create_workflow_span(operation: &str, agreement_id: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "workflow",
        workflow.operation = operation,
        agreement.id = agreement_id,
        correlation.id = correlation_id,
    )
}

/// Time an operation and log its duration
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
