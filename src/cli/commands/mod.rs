use anyhow::Result;
use serde::Serialize;

use crate::agreements::AgreementRecord;
use crate::handoff::HandoffOutcome;
use crate::service::AgreementService;
use crate::workflows::WORKFLOW_STEPS;

pub mod attach;
pub mod create;
pub mod discard;
pub mod list;
pub mod retry;
pub mod show;
pub mod step;

/// What every command runs against
pub struct CommandContext {
    pub service: AgreementService,
    pub json: bool,
}

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self, ctx: &CommandContext) -> Result<()>;
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One-line summary used by create/list
pub fn summary_line(record: &AgreementRecord) -> String {
    let transfer = if record.transferred {
        " 🚚 transferred"
    } else if record.handoff_flagged() {
        " ⚠️  handoff pending"
    } else {
        ""
    };
    format!(
        "{}  {} / {} ({})  step {}/{}  {}{}",
        record.id,
        record.client_name,
        record.title,
        record.agreement_type,
        record.current_step,
        WORKFLOW_STEPS.len(),
        record.status,
        transfer
    )
}

/// Checklist view of all steps
pub fn print_record(record: &AgreementRecord) {
    println!("📄 {} ({})", record.title, record.id);
    println!("   👤 Client: {}", record.client_name);
    println!("   🏷️  Type: {}", record.agreement_type);
    if let Some(description) = &record.description {
        println!("   📝 {}", description);
    }
    if let (Some(start), Some(end)) = (record.start_date, record.end_date) {
        println!("   📅 {} → {}", start, end);
    }
    if let Some(amount) = record.amount {
        println!("   💰 {:.2}", amount);
    }
    println!("   📊 Status: {} (version {})", record.status, record.version);
    println!();

    for step in WORKFLOW_STEPS.iter() {
        let state = record.step(step.ordinal);
        let marker = if state.completed {
            "✅"
        } else if step.ordinal == record.current_step {
            "👉"
        } else {
            "⬜"
        };
        println!("   {} {}. {} [{}]", marker, step.ordinal, step.title, step.kind);
        if let Some(attachment) = &state.attachment_ref {
            println!("        📎 {}", attachment);
        }
        if let Some(approved) = state.approved {
            println!("        {} {}", if approved { "👍" } else { "👎" }, if approved { "approved" } else { "rejected" });
        }
        if let Some(notes) = &state.notes {
            println!("        📝 {}", notes);
        }
    }

    println!();
    if record.transferred {
        println!(
            "🚚 Handed off as project {}",
            record.handoff.project_id.as_deref().unwrap_or("(unknown id)")
        );
    } else if let Some(error) = &record.handoff.last_error {
        println!("⚠️  Handoff pending after {} attempts: {}", record.handoff.attempts, error);
        println!("   💡 Run 'agreement-flow retry-handoffs' once the intake is reachable");
    }
}

pub fn describe_outcome(outcome: &HandoffOutcome) -> String {
    match outcome {
        HandoffOutcome::Accepted { project_id, .. } => format!("✅ accepted as {project_id}"),
        HandoffOutcome::AlreadyTransferred => "✅ already transferred".to_string(),
        HandoffOutcome::InFlight => "⏳ in flight elsewhere".to_string(),
        HandoffOutcome::Retryable { reason } => format!("⚠️  still pending: {reason}"),
        HandoffOutcome::Fatal { reason } => format!("❌ rejected: {reason}"),
    }
}

pub fn show_how_to_get_started() -> Result<()> {
    println!("📑 agreement-flow - Agreement approval workflow");
    println!();
    println!("To get started:");
    println!("  🆕 agreement-flow create --client Acme --type MSA --title 'Acme MSA'");
    println!("  📝 agreement-flow record-step <id> <step> --notes '...'");
    println!("  📎 agreement-flow attach <id> <step> ./draft.pdf");
    println!("  ✅ agreement-flow complete-step <id> <step>");
    println!("  👀 agreement-flow show <id>");
    println!("  📋 agreement-flow list");
    println!();
    println!("Maintenance:");
    println!("  🔁 agreement-flow retry-handoffs   # Re-deliver pending handoffs");
    Ok(())
}
