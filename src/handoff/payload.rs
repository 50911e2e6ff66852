use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::agreements::{AgreementId, AgreementRecord};

/// Project creation request sent to the downstream intake.
///
/// `source_agreement_id` is the dedupe key: delivering the same payload twice
/// must never produce a second project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPayload {
    pub source_agreement_id: AgreementId,
    pub name: String,
    pub client: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub description: String,
}

impl ProjectPayload {
    pub fn from_record(record: &AgreementRecord) -> Self {
        let name = if record.title.trim().is_empty() {
            format!("{} Agreement", record.client_name)
        } else {
            record.title.clone()
        };

        Self {
            source_agreement_id: record.id,
            name,
            client: record.client_name.clone(),
            start_date: record.start_date,
            end_date: record.end_date,
            description: describe(&record.agreement_type, &record.client_name, record.amount),
        }
    }

    /// Value sent as the `Idempotency-Key` header
    pub fn idempotency_key(&self) -> String {
        self.source_agreement_id.to_string()
    }
}

fn describe(agreement_type: &str, client: &str, amount: Option<f64>) -> String {
    match amount {
        Some(amount) => format!("{agreement_type} agreement for {client} (amount: {amount:.2})"),
        None => format!("{agreement_type} agreement for {client}"),
    }
}
