use anyhow::Result;

use super::{print_json, summary_line, Command, CommandContext};
use crate::agreements::{AgreementFilter, AgreementStatus, ListCursor, PageRequest};

pub struct ListCommand {
    pub status: Option<String>,
    pub client: Option<String>,
    pub pending_handoff: bool,
    pub limit: usize,
    pub after: Option<String>,
}

impl ListCommand {
    fn filter(&self) -> Result<AgreementFilter> {
        let status = self
            .status
            .as_deref()
            .map(|s| s.parse::<AgreementStatus>())
            .transpose()?;
        Ok(AgreementFilter {
            status,
            client_name: self.client.clone(),
            transferred: None,
            pending_handoff: self.pending_handoff,
        })
    }

    fn page(&self) -> Result<PageRequest> {
        Ok(match &self.after {
            Some(cursor) => PageRequest::after(cursor.parse::<ListCursor>()?, self.limit),
            None => PageRequest::first(self.limit),
        })
    }
}

impl Command for ListCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let page = ctx.service.list_agreements(&self.filter()?, self.page()?).await?;
        if ctx.json {
            return print_json(&page);
        }
        if page.records.is_empty() {
            println!("📋 No agreements found");
            return Ok(());
        }
        println!("📋 {} agreement(s):", page.records.len());
        for record in &page.records {
            println!("   {}", summary_line(record));
        }
        if let Some(cursor) = page.next_cursor {
            println!();
            println!("➡️  More results: --after {}", cursor);
        }
        Ok(())
    }
}
