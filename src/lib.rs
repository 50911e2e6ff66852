// Agreement Flow Library - eight-step agreement approval workflow
// This exposes the core components for testing and integration

pub mod agreements;
pub mod attachments;
pub mod cli;
pub mod config;
pub mod database;
pub mod errors;
pub mod handoff;
pub mod http;
pub mod intake;
pub mod observability;
pub mod service;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use agreements::{
    AgreementFieldsUpdate, AgreementFilter, AgreementId, AgreementPage, AgreementRecord,
    AgreementScan, AgreementStatus, AgreementStore, FileSystemAgreementStore, InMemoryAgreementStore,
    NewAgreement, PageRequest, StepDataUpdate, StepState,
};
pub use attachments::{AttachmentService, FileSystemAttachmentService, InMemoryAttachmentService};
pub use config::{config, init_config, AgreementFlowConfig};
#[cfg(feature = "database")]
pub use database::SqliteAgreementStore;
pub use errors::{AgreementError, Result};
pub use handoff::{
    HandoffEmitter, HandoffError, HandoffOutcome, IntakeDelivery, ProjectDelivery, ProjectPayload,
    RetryConfig,
};
pub use http::HttpProjectDelivery;
pub use intake::{InMemoryProjectIntake, IntakeDisposition, IntakeReceipt, ProjectIntake};
pub use observability::{create_workflow_span, HandoffMetrics, OperationTimer};
pub use service::AgreementService;
pub use telemetry::{generate_correlation_id, init_telemetry};
pub use workflows::{StepEngine, StepKind, WorkflowStep, FINAL_STEP, WORKFLOW_STEPS};
