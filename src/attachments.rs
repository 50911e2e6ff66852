//! Attachment storage behind an opaque reference.
//!
//! The workflow only ever sees the reference returned by `upload`; how the
//! bytes are kept is up to the implementation.
use async_trait::async_trait;
#[cfg(any(test, feature = "testing"))]
use mockall::automock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::agreements::AgreementId;
use crate::errors::{AgreementError, Result};

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait AttachmentService: Send + Sync {
    /// Store the bytes of a file uploaded for a step and return its reference
    async fn upload(
        &self,
        agreement_id: AgreementId,
        ordinal: u8,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String>;
}

fn check_upload(filename: &str, bytes: &[u8]) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(AgreementError::Validation("filename is required".to_string()));
    }
    if bytes.is_empty() {
        return Err(AgreementError::Validation(format!("{filename} is empty")));
    }
    Ok(())
}

/// Keep only characters that are safe in a single path component
fn sanitize(filename: &str) -> String {
    let name: String = filename
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    name.trim_start_matches('.').to_string()
}

#[derive(Debug, Default)]
pub struct InMemoryAttachmentService {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryAttachmentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, attachment_ref: &str) -> Option<Vec<u8>> {
        self.files.lock().await.get(attachment_ref).cloned()
    }
}

#[async_trait]
impl AttachmentService for InMemoryAttachmentService {
    async fn upload(
        &self,
        agreement_id: AgreementId,
        ordinal: u8,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        check_upload(filename, &bytes)?;
        let attachment_ref = format!("mem://{agreement_id}/{ordinal}/{}", Uuid::new_v4());
        self.files.lock().await.insert(attachment_ref.clone(), bytes);
        Ok(attachment_ref)
    }
}

/// Stores uploads under `<root>/attachments/<agreement>/<step>-<uuid>-<name>`.
/// The reference is the path relative to `root`.
#[derive(Debug, Clone)]
pub struct FileSystemAttachmentService {
    root: PathBuf,
}

impl FileSystemAttachmentService {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn resolve(&self, attachment_ref: &str) -> PathBuf {
        self.root.join(attachment_ref)
    }
}

#[async_trait]
impl AttachmentService for FileSystemAttachmentService {
    async fn upload(
        &self,
        agreement_id: AgreementId,
        ordinal: u8,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        check_upload(filename, &bytes)?;
        let relative = PathBuf::from("attachments")
            .join(agreement_id.to_string())
            .join(format!("{ordinal}-{}-{}", Uuid::new_v4(), sanitize(filename)));
        let target = self.root.join(&relative);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgreementError::Attachment(format!("creating {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| AgreementError::Attachment(format!("writing {}: {e}", target.display())))?;

        debug!(agreement.id = %agreement_id, step.ordinal = ordinal, "Stored attachment {}", relative.display());
        Ok(relative.to_string_lossy().replace('\\', "/"))
    }
}
