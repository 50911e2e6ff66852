// Operation surface of the agreement workflow
// Every call runs inside a workflow span tagged with a fresh correlation id

use anyhow::Context;
use std::sync::Arc;
use tracing::{debug, info, Instrument};

use crate::agreements::{
    AgreementFieldsUpdate, AgreementFilter, AgreementId, AgreementPage, AgreementRecord,
    AgreementStore, FileSystemAgreementStore, NewAgreement, PageRequest, StepDataUpdate,
};
use crate::attachments::{AttachmentService, FileSystemAttachmentService};
use crate::config::AgreementFlowConfig;
use crate::errors::{AgreementError, Result};
use crate::handoff::{DisabledDelivery, HandoffEmitter, ProjectDelivery};
use crate::http::HttpProjectDelivery;
use crate::observability::{create_workflow_span, HandoffMetrics};
use crate::telemetry::generate_correlation_id;
use crate::workflows::{definition, HandoffSweep, StepEngine};

pub struct AgreementService {
    store: Arc<dyn AgreementStore>,
    engine: StepEngine,
    attachments: Arc<dyn AttachmentService>,
}

impl AgreementService {
    pub fn new(
        store: Arc<dyn AgreementStore>,
        emitter: Arc<HandoffEmitter>,
        attachments: Arc<dyn AttachmentService>,
    ) -> Self {
        Self {
            engine: StepEngine::new(store.clone(), emitter),
            store,
            attachments,
        }
    }

    /// Wire up the configured store, intake transport and attachment directory
    pub async fn from_config(config: &AgreementFlowConfig) -> anyhow::Result<Self> {
        let store = open_store(config).await?;

        let delivery: Arc<dyn ProjectDelivery> = match &config.handoff.intake_url {
            Some(url) => Arc::new(
                HttpProjectDelivery::new(
                    url,
                    config.handoff.requests_per_second,
                    config.handoff.retry_config().attempt_timeout,
                )
                .context("Failed to build intake client")?,
            ),
            None => {
                info!("No intake_url configured; completed agreements will wait for a retry");
                Arc::new(DisabledDelivery)
            }
        };

        let emitter = HandoffEmitter::new(store.clone(), delivery, config.handoff.retry_config())
            .with_claim_lease(config.handoff.claim_lease());
        let attachments = Arc::new(FileSystemAttachmentService::new(&config.storage.data_dir));

        Ok(Self::new(store, Arc::new(emitter), attachments))
    }

    pub fn engine(&self) -> &StepEngine {
        &self.engine
    }

    pub fn handoff_metrics(&self) -> &Arc<HandoffMetrics> {
        self.engine.emitter().metrics()
    }

    pub async fn create_agreement(&self, fields: NewAgreement) -> Result<AgreementRecord> {
        let span = create_workflow_span("create_agreement", "new", &generate_correlation_id());
        async {
            let record = self.store.create(fields).await?;
            info!(agreement.id = %record.id, client = %record.client_name, "Agreement created");
            Ok(record)
        }
        .instrument(span)
        .await
    }

    /// Change business fields while the agreement is still active
    pub async fn update_fields(&self, id: AgreementId, update: AgreementFieldsUpdate) -> Result<AgreementRecord> {
        self.store
            .update(id, Box::new(|r| update.apply(r)))
            .instrument(span("update_fields", id))
            .await
    }

    pub async fn record_step(&self, id: AgreementId, ordinal: u8, update: StepDataUpdate) -> Result<AgreementRecord> {
        self.engine
            .record_step_data(id, ordinal, update)
            .instrument(span("record_step", id))
            .await
    }

    /// Store a file for a step and record its reference on the step
    pub async fn upload_attachment(
        &self,
        id: AgreementId,
        ordinal: u8,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<String> {
        async {
            definition::validate_ordinal(ordinal)?;
            // refuse before storing anything that could never be attached
            let record = self.store.get(id).await?;
            if ordinal > record.current_step {
                return Err(AgreementError::StepNotOpen {
                    ordinal,
                    current_step: record.current_step,
                });
            }

            let attachment_ref = self.attachments.upload(id, ordinal, filename, bytes).await?;
            self.engine
                .record_step_data(id, ordinal, StepDataUpdate::new().with_attachment(attachment_ref.clone()))
                .await?;
            Ok(attachment_ref)
        }
        .instrument(span("upload_attachment", id))
        .await
    }

    pub async fn complete_step(&self, id: AgreementId, ordinal: u8) -> Result<AgreementRecord> {
        self.engine
            .complete_step(id, ordinal)
            .instrument(span("complete_step", id))
            .await
    }

    pub async fn get_agreement(&self, id: AgreementId) -> Result<AgreementRecord> {
        self.store.get(id).instrument(span("get_agreement", id)).await
    }

    pub async fn list_agreements(&self, filter: &AgreementFilter, page: PageRequest) -> Result<AgreementPage> {
        let span = create_workflow_span("list_agreements", "all", &generate_correlation_id());
        self.store.list(filter, page).instrument(span).await
    }

    /// Remove an agreement for good. Returns false when there was nothing to remove.
    pub async fn discard_agreement(&self, id: AgreementId) -> Result<bool> {
        let removed = self.store.delete(id).instrument(span("discard_agreement", id)).await?;
        if removed {
            info!(agreement.id = %id, "Agreement discarded");
        } else {
            debug!(agreement.id = %id, "Discard requested for unknown agreement");
        }
        Ok(removed)
    }

    pub async fn retry_pending_handoffs(&self) -> Result<HandoffSweep> {
        let span = create_workflow_span("retry_pending_handoffs", "all", &generate_correlation_id());
        let sweep = self.engine.retry_pending_handoffs().instrument(span).await?;
        self.handoff_metrics().log_stats();
        Ok(sweep)
    }
}

fn span(operation: &str, id: AgreementId) -> tracing::Span {
    create_workflow_span(operation, &id.to_string(), &generate_correlation_id())
}

async fn open_store(config: &AgreementFlowConfig) -> anyhow::Result<Arc<dyn AgreementStore>> {
    if let Some(store) = open_database(config).await? {
        return Ok(store);
    }
    let store = FileSystemAgreementStore::open(&config.storage.data_dir)
        .await
        .with_context(|| format!("Failed to open data directory {}", config.storage.data_dir.display()))?;
    Ok(Arc::new(store))
}

#[cfg(feature = "database")]
async fn open_database(config: &AgreementFlowConfig) -> anyhow::Result<Option<Arc<dyn AgreementStore>>> {
    let Some(database) = &config.storage.database else {
        return Ok(None);
    };
    let store = crate::database::SqliteAgreementStore::new(
        &database.url,
        database.max_connections,
        database.auto_migrate,
    )
    .await
    .context("Failed to open agreement database")?;
    Ok(Some(Arc::new(store)))
}

#[cfg(not(feature = "database"))]
async fn open_database(config: &AgreementFlowConfig) -> anyhow::Result<Option<Arc<dyn AgreementStore>>> {
    if config.storage.database.is_some() {
        tracing::warn!("storage.database is set but this build has no database support; using the file store");
    }
    Ok(None)
}
