use async_trait::async_trait;
#[cfg(any(test, feature = "testing"))]
use mockall::automock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::payload::ProjectPayload;
use crate::intake::{IntakeError, IntakeReceipt, ProjectIntake};

/// Failure of a single delivery attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffError {
    #[error("transient delivery failure: {0}")]
    Retryable(String),

    #[error("delivery rejected: {0}")]
    Fatal(String),

    #[error("delivery attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl HandoffError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandoffError::Retryable(_) | HandoffError::Timeout(_))
    }
}

impl From<IntakeError> for HandoffError {
    fn from(error: IntakeError) -> Self {
        match error {
            IntakeError::Validation(reason) => HandoffError::Fatal(reason),
            IntakeError::Unavailable(reason) => HandoffError::Retryable(reason),
        }
    }
}

/// Transport carrying a payload to the project intake
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ProjectDelivery: Send + Sync {
    async fn deliver(&self, payload: &ProjectPayload) -> Result<IntakeReceipt, HandoffError>;
}

/// Delivers by calling an intake in the same process
pub struct IntakeDelivery {
    intake: Arc<dyn ProjectIntake>,
}

impl IntakeDelivery {
    pub fn new(intake: Arc<dyn ProjectIntake>) -> Self {
        Self { intake }
    }
}

#[async_trait]
impl ProjectDelivery for IntakeDelivery {
    async fn deliver(&self, payload: &ProjectPayload) -> Result<IntakeReceipt, HandoffError> {
        Ok(self.intake.ingest(payload).await?)
    }
}

/// Used when no intake endpoint is configured; every attempt fails fatally
/// and the agreement stays pending until a retry with a real endpoint.
#[derive(Debug, Default)]
pub struct DisabledDelivery;

#[async_trait]
impl ProjectDelivery for DisabledDelivery {
    async fn deliver(&self, _payload: &ProjectPayload) -> Result<IntakeReceipt, HandoffError> {
        Err(HandoffError::Fatal("no intake endpoint configured".to_string()))
    }
}
