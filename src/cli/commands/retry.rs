use anyhow::Result;
use serde_json::json;

use super::{describe_outcome, print_json, Command, CommandContext};

pub struct RetryHandoffsCommand;

impl Command for RetryHandoffsCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let sweep = ctx.service.retry_pending_handoffs().await?;
        if ctx.json {
            let outcomes: Vec<_> = sweep
                .outcomes
                .iter()
                .map(|(id, outcome)| json!({ "id": id, "result": outcome }))
                .collect();
            let errors: Vec<_> = sweep
                .errors
                .iter()
                .map(|(id, error)| json!({ "id": id, "code": error.code(), "message": error.to_string() }))
                .collect();
            return print_json(&json!({ "outcomes": outcomes, "errors": errors }));
        }

        if sweep.outcomes.is_empty() && sweep.errors.is_empty() {
            println!("✅ No pending handoffs");
            return Ok(());
        }
        println!("🔁 Retried {} pending handoff(s)", sweep.outcomes.len() + sweep.errors.len());
        for (id, outcome) in &sweep.outcomes {
            println!("   {}  {}", id, describe_outcome(outcome));
        }
        for (id, error) in &sweep.errors {
            println!("   {}  ❌ {}", id, error);
        }
        println!();
        println!("🚚 {} transferred", sweep.transferred());
        Ok(())
    }
}
