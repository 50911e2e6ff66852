use anyhow::Result;
use chrono::NaiveDate;
use uuid::Uuid;

use super::{print_json, print_record, Command, CommandContext};
use crate::agreements::StepDataUpdate;
use crate::workflows::definition;

pub struct RecordStepCommand {
    pub id: Uuid,
    pub ordinal: u8,
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub attachment: Option<String>,
    pub approved: Option<bool>,
}

impl RecordStepCommand {
    fn update(&self) -> StepDataUpdate {
        StepDataUpdate {
            date: self.date,
            notes: self.notes.clone(),
            attachment_ref: self.attachment.clone(),
            approved: self.approved,
        }
    }
}

impl Command for RecordStepCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let update = self.update();
        if update.is_empty() {
            anyhow::bail!("nothing to record: pass --date, --notes, --attachment, --approve or --reject");
        }
        let record = ctx.service.record_step(self.id, self.ordinal, update).await?;
        if ctx.json {
            return print_json(&record);
        }
        let title = definition::step(self.ordinal).map(|s| s.title).unwrap_or("?");
        println!("📝 Recorded data on step {} ({})", self.ordinal, title);
        Ok(())
    }
}

pub struct CompleteStepCommand {
    pub id: Uuid,
    pub ordinal: u8,
}

impl Command for CompleteStepCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let record = ctx.service.complete_step(self.id, self.ordinal).await?;
        if ctx.json {
            return print_json(&record);
        }
        if record.is_completed() {
            println!("🏁 Agreement completed");
            println!();
            print_record(&record);
        } else {
            let next = definition::step(record.current_step).map(|s| s.title).unwrap_or("?");
            println!("✅ Step {} completed", self.ordinal);
            println!("   👉 Now at step {}: {}", record.current_step, next);
        }
        Ok(())
    }
}
