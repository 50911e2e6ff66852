use anyhow::Result;
use uuid::Uuid;

use super::{print_json, print_record, Command, CommandContext};

pub struct ShowCommand {
    pub id: Uuid,
}

impl Command for ShowCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let record = ctx.service.get_agreement(self.id).await?;
        if ctx.json {
            return print_json(&record);
        }
        print_record(&record);
        Ok(())
    }
}
