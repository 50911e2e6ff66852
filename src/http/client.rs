use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use reqwest::StatusCode;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::{AgreementError, Result};
use crate::handoff::{HandoffError, ProjectDelivery, ProjectPayload};
use crate::intake::IntakeReceipt;

/// Header carrying the dedupe key of a delivery
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Rate-limited HTTP transport posting payloads to `{intake_url}/projects`.
///
/// Status mapping: 2xx is an acknowledgement, 408/429/5xx and transport
/// errors are transient, any other status is a rejection.
#[derive(Debug)]
pub struct HttpProjectDelivery {
    client: reqwest::Client,
    endpoint: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl HttpProjectDelivery {
    pub fn new(intake_url: &str, requests_per_second: u32, request_timeout: Duration) -> Result<Self> {
        let per_second = NonZeroU32::new(requests_per_second).ok_or_else(|| {
            AgreementError::Validation("requests_per_second must be at least 1".to_string())
        })?;
        let quota = Quota::per_second(per_second).allow_burst(per_second);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AgreementError::Validation(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/projects", intake_url.trim_end_matches('/')),
            rate_limiter,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

#[async_trait]
impl ProjectDelivery for HttpProjectDelivery {
    async fn deliver(&self, payload: &ProjectPayload) -> std::result::Result<IntakeReceipt, HandoffError> {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
            .await;

        debug!(agreement.id = %payload.source_agreement_id, "POST {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .header(IDEMPOTENCY_HEADER, payload.idempotency_key())
            .json(payload)
            .send()
            .await
            .map_err(|e| HandoffError::Retryable(format!("transport error: {e}")))?;

        let status = response.status();
        if status.is_success() {
            // the intake may have stored the project; a retry is safe because it dedupes
            return response
                .json::<IntakeReceipt>()
                .await
                .map_err(|e| HandoffError::Retryable(format!("unreadable acknowledgement: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        let reason = if body.trim().is_empty() {
            format!("intake answered {status}")
        } else {
            format!("intake answered {status}: {}", body.trim())
        };
        if is_transient(status) {
            Err(HandoffError::Retryable(reason))
        } else {
            Err(HandoffError::Fatal(reason))
        }
    }
}
