use anyhow::Result;
use chrono::NaiveDate;

use super::{print_json, summary_line, Command, CommandContext};
use crate::agreements::NewAgreement;

pub struct CreateCommand {
    pub client: String,
    pub agreement_type: String,
    pub title: String,
    pub description: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub amount: Option<f64>,
}

impl CreateCommand {
    fn fields(&self) -> NewAgreement {
        NewAgreement {
            client_name: self.client.clone(),
            agreement_type: self.agreement_type.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            start_date: self.start,
            end_date: self.end,
            amount: self.amount,
        }
    }
}

impl Command for CreateCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let record = ctx.service.create_agreement(self.fields()).await?;
        if ctx.json {
            return print_json(&record);
        }
        println!("🆕 Agreement created");
        println!("   {}", summary_line(&record));
        println!();
        println!("💡 Next: agreement-flow complete-step {} 1", record.id);
        Ok(())
    }
}
