// Step engine: the only writer of step state, current step and status
// Each operation is one atomic store update; the handoff runs after it, outside any lock

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::definition::{self, WorkflowStep};
use crate::agreements::{
    AgreementFilter, AgreementId, AgreementRecord, AgreementScan, AgreementStatus, AgreementStore,
    StepDataUpdate,
};
use crate::errors::{AgreementError, Result};
use crate::handoff::{HandoffEmitter, HandoffOutcome};
use crate::observability::OperationTimer;

/// Records are swept for pending handoffs this many at a time
const SWEEP_PAGE_SIZE: usize = 50;

/// Effect of a completion request on the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The step was completed and `next` became current
    Advanced { next: u8 },
    /// The final step was completed and the agreement is done
    Finished,
    /// The step had been completed before; nothing changed
    AlreadyCompleted,
}

/// Apply a completion of `step` to `record`.
///
/// Already completed steps are accepted without change so that a re-issued
/// request is harmless. Otherwise the step must be the current one and its
/// requirement must be met.
pub fn apply_completion(
    record: &mut AgreementRecord,
    step: &WorkflowStep,
    now: DateTime<Utc>,
) -> Result<Completion> {
    let ordinal = step.ordinal;
    if record.step(ordinal).completed {
        return Ok(Completion::AlreadyCompleted);
    }
    if ordinal != record.current_step {
        return Err(AgreementError::OutOfOrder {
            ordinal,
            current_step: record.current_step,
        });
    }
    step.kind
        .gate(&record.step(ordinal))
        .map_err(|reason| AgreementError::IncompletePrecondition { ordinal, reason })?;

    let state = record.step_mut(ordinal);
    state.completed = true;
    state.completed_at = Some(now);

    if definition::is_final(ordinal) {
        record.status = AgreementStatus::Completed;
        Ok(Completion::Finished)
    } else {
        let next = definition::next_ordinal(ordinal);
        record.current_step = next;
        Ok(Completion::Advanced { next })
    }
}

/// Merge step data into `record`. Steps after the current one are not open yet,
/// and a completed step keeps satisfying its requirement.
pub fn apply_step_data(
    record: &mut AgreementRecord,
    step: &WorkflowStep,
    update: &StepDataUpdate,
) -> Result<()> {
    let ordinal = step.ordinal;
    if ordinal > record.current_step {
        return Err(AgreementError::StepNotOpen {
            ordinal,
            current_step: record.current_step,
        });
    }
    let state = record.step_mut(ordinal);
    update.merge_into(state)?;
    if state.completed {
        step.kind.gate(state).map_err(|reason| {
            AgreementError::Validation(format!(
                "step {ordinal} is already completed and must stay satisfied: {reason}"
            ))
        })?;
    }
    Ok(())
}

/// Result of a sweep over agreements waiting for their handoff
#[derive(Debug, Default)]
pub struct HandoffSweep {
    pub outcomes: Vec<(AgreementId, HandoffOutcome)>,
    pub errors: Vec<(AgreementId, AgreementError)>,
}

impl HandoffSweep {
    pub fn transferred(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_transferred())
            .count()
    }
}

pub struct StepEngine {
    store: Arc<dyn AgreementStore>,
    emitter: Arc<HandoffEmitter>,
}

impl StepEngine {
    pub fn new(store: Arc<dyn AgreementStore>, emitter: Arc<HandoffEmitter>) -> Self {
        Self { store, emitter }
    }

    pub fn store(&self) -> &Arc<dyn AgreementStore> {
        &self.store
    }

    pub fn emitter(&self) -> &Arc<HandoffEmitter> {
        &self.emitter
    }

    /// Merge date, notes, attachment and approval into a step. Never completes it.
    pub async fn record_step_data(
        &self,
        id: AgreementId,
        ordinal: u8,
        update: StepDataUpdate,
    ) -> Result<AgreementRecord> {
        let step = definition::validate_ordinal(ordinal)?;
        let record = self
            .store
            .update(id, Box::new(|r| apply_step_data(r, step, &update)))
            .await?;
        debug!(agreement.id = %id, step.ordinal = ordinal, version = record.version, "Recorded step data");
        Ok(record)
    }

    /// Complete the current step and advance. Completing the final step
    /// finishes the agreement and hands it off; the handoff result is
    /// reflected on the returned record but never fails the call.
    pub async fn complete_step(&self, id: AgreementId, ordinal: u8) -> Result<AgreementRecord> {
        let step = definition::validate_ordinal(ordinal)?;
        let timer = OperationTimer::new("complete_step");
        let now = Utc::now();

        let mut completion = Completion::AlreadyCompleted;
        let record = self
            .store
            .update(
                id,
                Box::new(|r| {
                    completion = apply_completion(r, step, now)?;
                    Ok(())
                }),
            )
            .await?;

        match completion {
            Completion::Advanced { next } => {
                info!(agreement.id = %id, step.ordinal = ordinal, "Step '{}' completed, now at step {}", step.title, next);
            }
            Completion::Finished => {
                info!(agreement.id = %id, step.ordinal = ordinal, "Final step completed, agreement finished");
            }
            Completion::AlreadyCompleted => {
                debug!(agreement.id = %id, step.ordinal = ordinal, "Step already completed, nothing to do");
            }
        }

        let record = if definition::is_final(ordinal) && record.needs_handoff() {
            self.hand_off(record).await?
        } else {
            record
        };
        timer.finish();
        Ok(record)
    }

    /// Run the handoff for a completed record and return its state afterwards
    async fn hand_off(&self, record: AgreementRecord) -> Result<AgreementRecord> {
        match self.emitter.emit(&record).await {
            Ok(HandoffOutcome::Retryable { reason }) => {
                warn!(agreement.id = %record.id, "Handoff pending, will need a retry: {}", reason);
            }
            Ok(HandoffOutcome::Fatal { reason }) => {
                error!(agreement.id = %record.id, "Handoff rejected: {}", reason);
            }
            Ok(_) => {}
            Err(e) => {
                error!(agreement.id = %record.id, "Handoff could not run: {}", e);
                return Ok(record);
            }
        }
        self.store.get(record.id).await
    }

    /// Re-attempt the handoff of every completed agreement that is not yet transferred
    pub async fn retry_pending_handoffs(&self) -> Result<HandoffSweep> {
        let mut sweep = HandoffSweep::default();
        let mut scan = AgreementScan::new(
            self.store.as_ref(),
            AgreementFilter::pending_handoff(),
            SWEEP_PAGE_SIZE,
        );
        while let Some(page) = scan.next_page().await? {
            for record in page {
                match self.emitter.emit(&record).await {
                    Ok(outcome) => sweep.outcomes.push((record.id, outcome)),
                    Err(e) => {
                        warn!(agreement.id = %record.id, "Handoff retry failed: {}", e);
                        sweep.errors.push((record.id, e));
                    }
                }
            }
        }
        info!(
            "Handoff sweep finished: {} attempted, {} transferred, {} errors",
            sweep.outcomes.len(),
            sweep.transferred(),
            sweep.errors.len()
        );
        Ok(sweep)
    }
}
