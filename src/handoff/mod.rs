// Handoff of completed agreements into downstream projects

pub mod delivery;
pub mod emitter;
pub mod payload;
pub mod retry;

pub use delivery::{DisabledDelivery, HandoffError, IntakeDelivery, ProjectDelivery};
#[cfg(any(test, feature = "testing"))]
pub use delivery::MockProjectDelivery;
pub use emitter::{default_emitter_id, HandoffEmitter, HandoffOutcome, DEFAULT_CLAIM_LEASE};
pub use payload::ProjectPayload;
pub use retry::{DeliveryReport, DeliveryRetryHandler, RetryConfig};
