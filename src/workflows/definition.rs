// Fixed agreement approval workflow
// Eight ordered stages; gating is expressed by the step kind, never by the caller

use serde::{Deserialize, Serialize};

use crate::agreements::StepState;
use crate::errors::{AgreementError, Result};

/// First ordinal of the workflow
pub const FIRST_STEP: u8 = 1;

/// Last ordinal of the workflow; completing it finishes the agreement
pub const FINAL_STEP: u8 = 8;

/// What a step requires before it can be completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    /// No precondition
    Simple,
    /// An attachment reference must be recorded on the step
    Upload,
    /// The step must be explicitly approved
    Approval,
}

impl StepKind {
    /// Check the step's recorded data against this kind's precondition
    pub fn gate(&self, state: &StepState) -> std::result::Result<(), String> {
        match self {
            StepKind::Simple => Ok(()),
            StepKind::Upload => match state.attachment_ref.as_deref() {
                Some(r) if !r.trim().is_empty() => Ok(()),
                _ => Err("an attachment must be uploaded first".to_string()),
            },
            StepKind::Approval => {
                if state.approved == Some(true) {
                    Ok(())
                } else {
                    Err("the step must be approved first".to_string())
                }
            }
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StepKind::Simple => "simple",
            StepKind::Upload => "upload",
            StepKind::Approval => "approval",
        };
        f.write_str(label)
    }
}

/// One immutable stage of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowStep {
    pub ordinal: u8,
    pub title: &'static str,
    pub kind: StepKind,
}

/// The canonical ordering of workflow steps, shared by every agreement.
pub const WORKFLOW_STEPS: [WorkflowStep; FINAL_STEP as usize] = [
    WorkflowStep { ordinal: 1, title: "Negotiation closed", kind: StepKind::Simple },
    WorkflowStep { ordinal: 2, title: "Draft created", kind: StepKind::Upload },
    WorkflowStep { ordinal: 3, title: "Internal approval", kind: StepKind::Approval },
    WorkflowStep { ordinal: 4, title: "Sent to client", kind: StepKind::Simple },
    WorkflowStep { ordinal: 5, title: "Client approval", kind: StepKind::Approval },
    WorkflowStep { ordinal: 6, title: "Stamping", kind: StepKind::Upload },
    WorkflowStep { ordinal: 7, title: "Signatures", kind: StepKind::Upload },
    WorkflowStep { ordinal: 8, title: "Operational handover", kind: StepKind::Upload },
];

/// Look up a step by its 1-based ordinal.
pub fn step(ordinal: u8) -> Option<&'static WorkflowStep> {
    if ordinal < FIRST_STEP {
        return None;
    }
    WORKFLOW_STEPS.get(usize::from(ordinal - FIRST_STEP))
}

/// Resolve an ordinal or fail with `InvalidStep`.
pub fn validate_ordinal(ordinal: u8) -> Result<&'static WorkflowStep> {
    step(ordinal).ok_or(AgreementError::InvalidStep {
        ordinal,
        max: FINAL_STEP,
    })
}

/// The step that becomes current after `ordinal` completes. The final step stays current.
pub fn next_ordinal(ordinal: u8) -> u8 {
    ordinal.saturating_add(1).min(FINAL_STEP)
}

pub fn is_final(ordinal: u8) -> bool {
    ordinal == FINAL_STEP
}
