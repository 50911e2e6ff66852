use anyhow::Result;
use uuid::Uuid;

use super::{print_json, Command, CommandContext};

pub struct DiscardCommand {
    pub id: Uuid,
}

impl Command for DiscardCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let removed = ctx.service.discard_agreement(self.id).await?;
        if ctx.json {
            return print_json(&serde_json::json!({ "id": self.id, "discarded": removed }));
        }
        if removed {
            println!("🗑️  Agreement {} discarded", self.id);
        } else {
            println!("🤷 Agreement {} not found, nothing to discard", self.id);
        }
        Ok(())
    }
}
