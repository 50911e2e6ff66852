// Receiving side of the handoff
// Ingestion is keyed by the source agreement id so repeated delivery creates one project

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
#[cfg(any(test, feature = "testing"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::agreements::AgreementId;
use crate::handoff::ProjectPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntakeDisposition {
    Created,
    AlreadyExists,
}

/// Acknowledgement returned by the intake for an accepted payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeReceipt {
    pub project_id: String,
    pub disposition: IntakeDisposition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub source_agreement_id: AgreementId,
    pub name: String,
    pub client: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("payload rejected: {0}")]
    Validation(String),

    #[error("intake unavailable: {0}")]
    Unavailable(String),
}

/// Idempotent project ingestion
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ProjectIntake: Send + Sync {
    /// Create a project for the payload, or return the one already created
    /// for the same source agreement.
    async fn ingest(&self, payload: &ProjectPayload) -> Result<IntakeReceipt, IntakeError>;
}

#[derive(Debug, Default)]
struct IntakeState {
    projects: Vec<Project>,
    by_source: HashMap<AgreementId, usize>,
    ingest_calls: u64,
}

/// In-process intake used by tests and single-binary deployments.
///
/// Lookup and insert happen under one lock so concurrent duplicates resolve
/// to a single project.
#[derive(Debug, Default)]
pub struct InMemoryProjectIntake {
    state: Mutex<IntakeState>,
}

impl InMemoryProjectIntake {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_by_source(&self, source_agreement_id: AgreementId) -> Option<Project> {
        let state = self.state.lock().await;
        state
            .by_source
            .get(&source_agreement_id)
            .map(|&index| state.projects[index].clone())
    }

    pub async fn projects(&self) -> Vec<Project> {
        self.state.lock().await.projects.clone()
    }

    /// Total ingest calls received, duplicates included
    pub async fn ingest_calls(&self) -> u64 {
        self.state.lock().await.ingest_calls
    }
}

#[async_trait]
impl ProjectIntake for InMemoryProjectIntake {
    async fn ingest(&self, payload: &ProjectPayload) -> Result<IntakeReceipt, IntakeError> {
        if payload.name.trim().is_empty() || payload.client.trim().is_empty() {
            return Err(IntakeError::Validation(
                "project name and client are required".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        state.ingest_calls += 1;

        if let Some(&index) = state.by_source.get(&payload.source_agreement_id) {
            let project_id = state.projects[index].id.clone();
            debug!(
                agreement.id = %payload.source_agreement_id,
                project.id = %project_id,
                "Duplicate ingest, returning existing project"
            );
            return Ok(IntakeReceipt {
                project_id,
                disposition: IntakeDisposition::AlreadyExists,
            });
        }

        let project = Project {
            id: format!("PRJ-{:06}", state.projects.len() + 1),
            source_agreement_id: payload.source_agreement_id,
            name: payload.name.clone(),
            client: payload.client.clone(),
            start_date: payload.start_date,
            end_date: payload.end_date,
            description: payload.description.clone(),
            created_at: Utc::now(),
        };
        let project_id = project.id.clone();
        state.projects.push(project);
        let index = state.projects.len() - 1;
        state.by_source.insert(payload.source_agreement_id, index);

        info!(
            agreement.id = %payload.source_agreement_id,
            project.id = %project_id,
            "Created project from agreement"
        );
        Ok(IntakeReceipt {
            project_id,
            disposition: IntakeDisposition::Created,
        })
    }
}
