// Outbound HTTP delivery to the project intake

pub mod client;

pub use client::{HttpProjectDelivery, IDEMPOTENCY_HEADER};
