use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::{AgreementError, Result};
use crate::workflows::definition::{self, FINAL_STEP, FIRST_STEP};

pub type AgreementId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgreementStatus {
    Active,
    Completed,
}

impl std::fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgreementStatus::Active => f.write_str("ACTIVE"),
            AgreementStatus::Completed => f.write_str("COMPLETED"),
        }
    }
}

impl std::str::FromStr for AgreementStatus {
    type Err = AgreementError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AgreementStatus::Active),
            "completed" => Ok(AgreementStatus::Completed),
            other => Err(AgreementError::Validation(format!("unknown status '{other}'"))),
        }
    }
}

/// Per-step data recorded on an agreement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub attachment_ref: Option<String>,
    pub approved: Option<bool>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Delivery bookkeeping for the downstream project handoff.
///
/// `in_flight` is a claim held by exactly one emitter at a time; it expires
/// after the configured lease so a crashed emitter cannot block the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandoffState {
    pub attempts: u32,
    pub in_flight: bool,
    pub claimed_by: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub project_id: Option<String>,
}

/// Fields supplied when creating an agreement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewAgreement {
    pub client_name: String,
    pub agreement_type: String,
    pub title: String,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub amount: Option<f64>,
}

impl NewAgreement {
    pub fn new(
        client_name: impl Into<String>,
        agreement_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            agreement_type: agreement_type.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_period(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Reject blank required fields and inconsistent values
    pub fn validate(&self) -> Result<()> {
        require("client_name", &self.client_name)?;
        require("agreement_type", &self.agreement_type)?;
        require("title", &self.title)?;
        validate_period(self.start_date, self.end_date)?;
        validate_amount(self.amount)
    }
}

/// Partial update of business fields; only `Some` values are applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgreementFieldsUpdate {
    pub client_name: Option<String>,
    pub agreement_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub amount: Option<f64>,
}

impl AgreementFieldsUpdate {
    /// Apply onto a record. Business fields are frozen once the agreement is completed.
    pub fn apply(&self, record: &mut AgreementRecord) -> Result<()> {
        if record.status == AgreementStatus::Completed {
            return Err(AgreementError::Validation(
                "business fields cannot change after the agreement is completed".to_string(),
            ));
        }
        if let Some(v) = &self.client_name {
            require("client_name", v)?;
            record.client_name = v.trim().to_string();
        }
        if let Some(v) = &self.agreement_type {
            require("agreement_type", v)?;
            record.agreement_type = v.trim().to_string();
        }
        if let Some(v) = &self.title {
            require("title", v)?;
            record.title = v.trim().to_string();
        }
        if let Some(v) = &self.description {
            record.description = Some(v.clone());
        }
        if self.start_date.is_some() {
            record.start_date = self.start_date;
        }
        if self.end_date.is_some() {
            record.end_date = self.end_date;
        }
        if self.amount.is_some() {
            validate_amount(self.amount)?;
            record.amount = self.amount;
        }
        validate_period(record.start_date, record.end_date)
    }
}

/// Data submitted for a single step; `completed` is never touched by it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDataUpdate {
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub attachment_ref: Option<String>,
    pub approved: Option<bool>,
}

impl StepDataUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_attachment(mut self, attachment_ref: impl Into<String>) -> Self {
        self.attachment_ref = Some(attachment_ref.into());
        self
    }

    pub fn with_approval(mut self, approved: bool) -> Self {
        self.approved = Some(approved);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.notes.is_none()
            && self.attachment_ref.is_none()
            && self.approved.is_none()
    }

    /// Merge the provided fields into a step state
    pub fn merge_into(&self, state: &mut StepState) -> Result<()> {
        if let Some(r) = &self.attachment_ref {
            if r.trim().is_empty() {
                return Err(AgreementError::Validation(
                    "attachment_ref must not be blank".to_string(),
                ));
            }
            state.attachment_ref = Some(r.clone());
        }
        if let Some(date) = self.date {
            state.date = Some(date);
        }
        if let Some(notes) = &self.notes {
            state.notes = Some(notes.clone());
        }
        if let Some(approved) = self.approved {
            state.approved = Some(approved);
        }
        Ok(())
    }
}

/// One agreement moving through the approval workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementRecord {
    pub id: AgreementId,
    pub client_name: String,
    pub agreement_type: String,
    pub title: String,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub amount: Option<f64>,
    pub current_step: u8,
    pub steps: BTreeMap<u8, StepState>,
    pub status: AgreementStatus,
    pub transferred: bool,
    #[serde(default)]
    pub handoff: HandoffState,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgreementRecord {
    /// Build a fresh record at step 1 with an empty state for every step.
    /// Callers are expected to have validated `fields`.
    pub fn new(id: AgreementId, fields: NewAgreement, now: DateTime<Utc>) -> Self {
        let steps = (FIRST_STEP..=FINAL_STEP)
            .map(|ordinal| (ordinal, StepState::default()))
            .collect();
        Self {
            id,
            client_name: fields.client_name.trim().to_string(),
            agreement_type: fields.agreement_type.trim().to_string(),
            title: fields.title.trim().to_string(),
            description: fields.description,
            start_date: fields.start_date,
            end_date: fields.end_date,
            amount: fields.amount,
            current_step: FIRST_STEP,
            steps,
            status: AgreementStatus::Active,
            transferred: false,
            handoff: HandoffState::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// State of a step; missing entries read as empty
    pub fn step(&self, ordinal: u8) -> StepState {
        self.steps.get(&ordinal).cloned().unwrap_or_default()
    }

    pub fn step_mut(&mut self, ordinal: u8) -> &mut StepState {
        self.steps.entry(ordinal).or_default()
    }

    pub fn is_completed(&self) -> bool {
        self.status == AgreementStatus::Completed
    }

    /// Completed but not yet acknowledged by the downstream intake
    pub fn needs_handoff(&self) -> bool {
        self.is_completed() && !self.transferred
    }

    /// Completed, untransferred, and the last delivery attempt failed
    pub fn handoff_flagged(&self) -> bool {
        self.needs_handoff() && self.handoff.last_error.is_some()
    }

    /// Number of steps marked completed
    pub fn completed_steps(&self) -> usize {
        self.steps.values().filter(|s| s.completed).count()
    }

    /// Verify the structural workflow invariants, returning the first violation
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if !(FIRST_STEP..=FINAL_STEP).contains(&self.current_step) {
            return Err(format!("current_step {} out of range", self.current_step));
        }
        for ordinal in FIRST_STEP..self.current_step {
            if !self.step(ordinal).completed {
                return Err(format!(
                    "step {} is before current step {} but not completed",
                    ordinal, self.current_step
                ));
            }
        }
        for (ordinal, state) in &self.steps {
            if !state.completed {
                continue;
            }
            let Some(step) = definition::step(*ordinal) else {
                return Err(format!("unknown step {ordinal} recorded"));
            };
            if let Err(reason) = step.kind.gate(state) {
                return Err(format!("step {ordinal} completed without its requirement: {reason}"));
            }
        }
        let final_done = self.step(FINAL_STEP).completed;
        if final_done != self.is_completed() {
            return Err(format!(
                "status {} disagrees with final step completion {}",
                self.status, final_done
            ));
        }
        if self.transferred && !self.is_completed() {
            return Err("transferred set on an active agreement".to_string());
        }
        Ok(())
    }
}

/// Criteria for listing agreements; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgreementFilter {
    pub status: Option<AgreementStatus>,
    pub client_name: Option<String>,
    pub transferred: Option<bool>,
    /// Only completed agreements still waiting for a successful handoff
    #[serde(default)]
    pub pending_handoff: bool,
}

impl AgreementFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn pending_handoff() -> Self {
        Self {
            pending_handoff: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &AgreementRecord) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(client) = &self.client_name {
            if !record.client_name.eq_ignore_ascii_case(client.trim()) {
                return false;
            }
        }
        if let Some(transferred) = self.transferred {
            if record.transferred != transferred {
                return false;
            }
        }
        if self.pending_handoff && !record.needs_handoff() {
            return false;
        }
        true
    }
}

/// Position in the listing order `(created_at, id)`; listing resumes strictly after it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ListCursor {
    pub created_at: DateTime<Utc>,
    pub id: AgreementId,
}

impl ListCursor {
    pub fn of(record: &AgreementRecord) -> Self {
        Self {
            created_at: record.created_at,
            id: record.id,
        }
    }
}

impl std::fmt::Display for ListCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.id
        )
    }
}

impl std::str::FromStr for ListCursor {
    type Err = AgreementError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AgreementError::Validation(format!("invalid list cursor '{s}'"));
        let (timestamp, id) = s.split_once('_').ok_or_else(invalid)?;
        let created_at = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|_| invalid())?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(id).map_err(|_| invalid())?;
        Ok(Self { created_at, id })
    }
}

impl From<ListCursor> for String {
    fn from(cursor: ListCursor) -> Self {
        cursor.to_string()
    }
}

impl TryFrom<String> for ListCursor {
    type Error = AgreementError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    pub after: Option<ListCursor>,
    pub limit: usize,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn first(limit: usize) -> Self {
        Self {
            after: None,
            limit: limit.max(1),
        }
    }

    pub fn after(cursor: ListCursor, limit: usize) -> Self {
        Self {
            after: Some(cursor),
            limit: limit.max(1),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(Self::DEFAULT_LIMIT)
    }
}

/// One page of a listing; `next_cursor` is `None` on the last page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementPage {
    pub records: Vec<AgreementRecord>,
    pub next_cursor: Option<ListCursor>,
}

impl AgreementPage {
    /// Cut an ordered, filtered candidate list down to one page
    pub fn from_sorted(mut candidates: Vec<AgreementRecord>, page: &PageRequest) -> Self {
        if let Some(after) = page.after {
            candidates.retain(|r| ListCursor::of(r) > after);
        }
        let limit = page.limit.max(1);
        let has_more = candidates.len() > limit;
        candidates.truncate(limit);
        let next_cursor = if has_more {
            candidates.last().map(ListCursor::of)
        } else {
            None
        };
        Self {
            records: candidates,
            next_cursor,
        }
    }
}

/// Sort records into listing order
pub fn sort_for_listing(records: &mut [AgreementRecord]) {
    records.sort_by_key(ListCursor::of);
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AgreementError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn validate_period(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(AgreementError::Validation(format!(
                "end_date {end} is before start_date {start}"
            )));
        }
    }
    Ok(())
}

fn validate_amount(amount: Option<f64>) -> Result<()> {
    match amount {
        Some(a) if !a.is_finite() || a < 0.0 => Err(AgreementError::Validation(format!(
            "amount must be a non-negative number, got {a}"
        ))),
        _ => Ok(()),
    }
}
