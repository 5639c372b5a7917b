//! Per-document summarization progress.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Cached,
    Error,
}

impl DocumentStatus {
    /// Completed, cached and errored documents receive no further updates.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed | DocumentStatus::Cached | DocumentStatus::Error
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentProgress {
    pub doc_id: String,
    pub doc_name: String,
    pub status: DocumentStatus,
    pub summary: String,
    /// Position of the document within the batch.
    pub index: usize,
    /// Batch size as reported with the document. Zero when unknown.
    pub total: usize,
}

/// Expected batch shape announced by `doc_summary_init`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchExpectation {
    pub total: usize,
    pub cached: usize,
    pub to_generate: usize,
}
