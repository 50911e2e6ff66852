use anyhow::{Context, Result};
use std::path::PathBuf;
use uuid::Uuid;

use super::{Command, CommandContext};

pub struct AttachCommand {
    pub id: Uuid,
    pub ordinal: u8,
    pub file: PathBuf,
}

impl Command for AttachCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let bytes = tokio::fs::read(&self.file)
            .await
            .with_context(|| format!("Failed to read {}", self.file.display()))?;
        let filename = self
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let attachment_ref = ctx
            .service
            .upload_attachment(self.id, self.ordinal, bytes, &filename)
            .await?;

        if ctx.json {
            return super::print_json(&serde_json::json!({ "attachmentRef": attachment_ref }));
        }
        println!("📎 Attached {} to step {}", filename, self.ordinal);
        println!("   🔗 {}", attachment_ref);
        Ok(())
    }
}
