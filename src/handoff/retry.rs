// Bounded retry for project delivery
// Every attempt runs under a timeout; only transient failures are retried

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, error, warn};

use super::delivery::{HandoffError, ProjectDelivery};
use super::payload::ProjectPayload;
use crate::intake::IntakeReceipt;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(10),
            jitter: true,
        }
    }
}

/// Result of a delivery run across all its attempts
#[derive(Debug)]
pub struct DeliveryReport {
    pub result: Result<IntakeReceipt, HandoffError>,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct DeliveryRetryHandler {
    config: RetryConfig,
}

impl DeliveryRetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delays between attempts: base, 2x base, 4x base ... capped at `max_delay`
    fn strategy(&self) -> impl Iterator<Item = Duration> {
        let factor = (self.config.base_delay.as_millis() as u64 / 2).max(1);
        let with_jitter = self.config.jitter;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.config.max_delay)
            .map(move |delay| if with_jitter { jitter(delay) } else { delay })
            .take(self.config.max_attempts.saturating_sub(1) as usize)
    }

    /// Deliver `payload`, retrying transient failures with exponential backoff
    pub async fn deliver(
        &self,
        delivery: &dyn ProjectDelivery,
        payload: &ProjectPayload,
    ) -> DeliveryReport {
        let attempts = AtomicU32::new(0);
        let timeout = self.config.attempt_timeout;
        let agreement_id = payload.source_agreement_id;

        debug!(
            agreement.id = %agreement_id,
            "Starting delivery with max {} attempts", self.config.max_attempts
        );

        let result = RetryIf::spawn(
            self.strategy(),
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    let outcome = match tokio::time::timeout(timeout, delivery.deliver(payload)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(HandoffError::Timeout(timeout)),
                    };
                    match &outcome {
                        Ok(receipt) => {
                            debug!(agreement.id = %agreement_id, attempt, project.id = %receipt.project_id, "Delivery accepted");
                        }
                        Err(e) if e.is_retryable() => {
                            warn!(agreement.id = %agreement_id, attempt, "Delivery failed (retryable): {}", e);
                        }
                        Err(e) => {
                            error!(agreement.id = %agreement_id, attempt, "Delivery failed (non-retryable): {}", e);
                        }
                    }
                    outcome
                }
            },
            |e: &HandoffError| e.is_retryable(),
        )
        .await;

        DeliveryReport {
            result,
            attempts: attempts.load(Ordering::SeqCst),
        }
    }
}

impl Default for DeliveryRetryHandler {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
