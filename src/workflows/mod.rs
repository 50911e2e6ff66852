// Agreement approval workflow
// The step catalog is fixed; the engine is the only component that advances a record

pub mod definition;
pub mod engine;

pub use definition::{StepKind, WorkflowStep, FINAL_STEP, FIRST_STEP, WORKFLOW_STEPS};
pub use engine::{apply_completion, apply_step_data, Completion, HandoffSweep, StepEngine};
