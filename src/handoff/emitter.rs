use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::delivery::{HandoffError, ProjectDelivery};
use super::payload::ProjectPayload;
use super::retry::{DeliveryRetryHandler, RetryConfig};
use crate::agreements::{AgreementRecord, AgreementStore};
use crate::errors::{AgreementError, Result};
use crate::intake::IntakeDisposition;
use crate::observability::HandoffMetrics;

/// How long a claim protects an in-flight delivery before others may take over
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(300);

/// What happened when a handoff was requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandoffOutcome {
    /// The intake confirmed a project for this agreement
    Accepted {
        project_id: String,
        disposition: IntakeDisposition,
    },
    /// Nothing to do: a project was already confirmed earlier
    AlreadyTransferred,
    /// Another emitter currently holds the delivery claim
    InFlight,
    /// Retry budget exhausted on transient failures
    Retryable { reason: String },
    /// The intake rejected the payload
    Fatal { reason: String },
}

impl HandoffOutcome {
    pub fn is_transferred(&self) -> bool {
        matches!(
            self,
            HandoffOutcome::Accepted { .. } | HandoffOutcome::AlreadyTransferred
        )
    }
}

enum Claim {
    Acquired,
    AlreadyTransferred,
    Held { by: Option<String> },
}

/// Converts completed agreements into downstream projects.
///
/// Delivery is at-least-once; the intake dedupes on the agreement id, which
/// makes the overall effect exactly-once. A claim recorded on the agreement
/// keeps two emitters from delivering the same agreement concurrently, and no
/// store lock is held while the network call is in progress.
pub struct HandoffEmitter {
    store: Arc<dyn AgreementStore>,
    delivery: Arc<dyn ProjectDelivery>,
    retry: DeliveryRetryHandler,
    claim_lease: Duration,
    emitter_id: String,
    metrics: Arc<HandoffMetrics>,
}

impl HandoffEmitter {
    pub fn new(
        store: Arc<dyn AgreementStore>,
        delivery: Arc<dyn ProjectDelivery>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            delivery,
            retry: DeliveryRetryHandler::new(retry),
            claim_lease: DEFAULT_CLAIM_LEASE,
            emitter_id: default_emitter_id(),
            metrics: Arc::new(HandoffMetrics::new()),
        }
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<HandoffMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_emitter_id(mut self, emitter_id: impl Into<String>) -> Self {
        self.emitter_id = emitter_id.into();
        self
    }

    pub fn metrics(&self) -> &Arc<HandoffMetrics> {
        &self.metrics
    }

    /// Deliver a completed agreement to the intake and mark it transferred on
    /// confirmation. Store failures are returned as errors; delivery failures
    /// are recorded on the agreement and reported through the outcome.
    pub async fn emit(&self, record: &AgreementRecord) -> Result<HandoffOutcome> {
        let id = record.id;
        let now = Utc::now();
        // leases beyond chrono's range never expire
        let lease = chrono::Duration::from_std(self.claim_lease).unwrap_or(chrono::TimeDelta::MAX);
        let emitter_id = self.emitter_id.clone();

        let mut claim = Claim::Acquired;
        let claimed = self
            .store
            .update(
                id,
                Box::new(|r| {
                    if r.transferred {
                        claim = Claim::AlreadyTransferred;
                        return Ok(());
                    }
                    if !r.is_completed() {
                        return Err(AgreementError::Validation(format!(
                            "agreement {} is not completed",
                            r.id
                        )));
                    }
                    if r.handoff.in_flight && !lease_expired(r.handoff.last_attempt_at, lease, now) {
                        claim = Claim::Held {
                            by: r.handoff.claimed_by.clone(),
                        };
                        return Ok(());
                    }
                    if r.handoff.in_flight {
                        warn!(
                            agreement.id = %r.id,
                            "Taking over expired handoff claim from {:?}", r.handoff.claimed_by
                        );
                    }
                    claim = Claim::Acquired;
                    r.handoff.in_flight = true;
                    r.handoff.claimed_by = Some(emitter_id.clone());
                    r.handoff.last_attempt_at = Some(now);
                    Ok(())
                }),
            )
            .await?;

        match claim {
            Claim::AlreadyTransferred => {
                self.metrics.record_duplicate();
                info!(agreement.id = %id, "Agreement already transferred, handoff skipped");
                return Ok(HandoffOutcome::AlreadyTransferred);
            }
            Claim::Held { by } => {
                self.metrics.record_contended();
                info!(agreement.id = %id, "Handoff already in flight on {:?}", by);
                return Ok(HandoffOutcome::InFlight);
            }
            Claim::Acquired => {}
        }

        let payload = ProjectPayload::from_record(&claimed);
        let report = self.retry.deliver(self.delivery.as_ref(), &payload).await;
        self.metrics.record_attempts(report.attempts);

        let attempts = report.attempts;
        let result = report.result;
        self.store
            .update(
                id,
                Box::new(|r| {
                    // a claim taken over after our lease ran out belongs to its new holder
                    if r.handoff.claimed_by.as_deref() == Some(emitter_id.as_str()) {
                        r.handoff.in_flight = false;
                        r.handoff.claimed_by = None;
                    }
                    r.handoff.attempts = r.handoff.attempts.saturating_add(attempts);
                    match &result {
                        Ok(receipt) => {
                            r.transferred = true;
                            r.handoff.project_id = Some(receipt.project_id.clone());
                            r.handoff.last_error = None;
                        }
                        Err(e) => r.handoff.last_error = Some(e.to_string()),
                    }
                    Ok(())
                }),
            )
            .await?;

        let outcome = match result {
            Ok(receipt) => {
                self.metrics.record_accepted();
                info!(
                    agreement.id = %id,
                    project.id = %receipt.project_id,
                    attempts,
                    "Agreement handed off to project intake"
                );
                HandoffOutcome::Accepted {
                    project_id: receipt.project_id,
                    disposition: receipt.disposition,
                }
            }
            Err(e @ (HandoffError::Retryable(_) | HandoffError::Timeout(_))) => {
                self.metrics.record_retryable_failure();
                HandoffOutcome::Retryable {
                    reason: e.to_string(),
                }
            }
            Err(e @ HandoffError::Fatal(_)) => {
                self.metrics.record_fatal_failure();
                HandoffOutcome::Fatal {
                    reason: e.to_string(),
                }
            }
        };
        Ok(outcome)
    }
}

fn lease_expired(claimed_at: Option<DateTime<Utc>>, lease: chrono::Duration, now: DateTime<Utc>) -> bool {
    match claimed_at {
        Some(at) => at.checked_add_signed(lease).is_some_and(|end| end <= now),
        None => true,
    }
}

/// `host:pid` of this process, used to label claims
pub fn default_emitter_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string());
    format!("{}:{}", host, std::process::id())
}
