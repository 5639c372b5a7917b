//! Per-document summarization progress for the current generation.
//!
//! Every publish hands subscribers a fresh [`ProgressSnapshot`] behind an
//! `Arc`; a published snapshot is never mutated afterwards, so pointer
//! comparison is a valid change check.

use std::collections::HashMap;
use std::sync::Arc;

use docent_types::{
    BatchExpectation, DocSummaryComplete, DocSummaryStart, DocumentProgress, DocumentStatus,
};
use tokio::sync::watch;

/// Immutable view of the progress map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub expectation: Option<BatchExpectation>,
    pub documents: HashMap<String, DocumentProgress>,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn get(&self, doc_id: &str) -> Option<&DocumentProgress> {
        self.documents.get(doc_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Documents in batch order.
    #[must_use]
    pub fn ordered(&self) -> Vec<&DocumentProgress> {
        let mut docs: Vec<_> = self.documents.values().collect();
        docs.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.doc_id.cmp(&b.doc_id)));
        docs
    }

    /// Number of documents in a terminal state.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.documents
            .values()
            .filter(|doc| doc.status.is_terminal())
            .count()
    }
}

/// A progress mutation, as produced by the generation reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    Init(BatchExpectation),
    Start(DocSummaryStart),
    Chunk { doc_id: String, content: String },
    Complete(DocSummaryComplete),
}

/// When subscribers see an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Published right away.
    Immediate,
    /// Published on the next [`ProgressAggregator::flush`].
    Coalesced,
}

#[derive(Debug)]
pub struct ProgressAggregator {
    expectation: Option<BatchExpectation>,
    documents: HashMap<String, DocumentProgress>,
    tx: watch::Sender<Arc<ProgressSnapshot>>,
    flush_pending: bool,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressAggregator {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(ProgressSnapshot::default()));
        Self {
            expectation: None,
            documents: HashMap::new(),
            tx,
            flush_pending: false,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ProgressSnapshot>> {
        self.tx.subscribe()
    }

    /// The most recently published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ProgressSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    #[must_use]
    pub fn has_pending_flush(&self) -> bool {
        self.flush_pending
    }

    pub fn apply(&mut self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::Init(expectation) => self.init(expectation),
            ProgressUpdate::Start(start) => self.start(start),
            ProgressUpdate::Chunk { doc_id, content } => self.chunk(&doc_id, &content),
            ProgressUpdate::Complete(complete) => self.complete(complete),
        }
    }

    /// Size the expected batch, discarding entries from any earlier batch.
    pub fn init(&mut self, expectation: BatchExpectation) {
        self.expectation = Some(expectation);
        self.documents.clear();
        self.deliver(Delivery::Immediate);
    }

    pub fn start(&mut self, start: DocSummaryStart) {
        let DocSummaryStart {
            doc_id,
            doc_name,
            index,
            total,
        } = start;
        let entry = self
            .documents
            .entry(doc_id.clone())
            .or_insert_with(|| DocumentProgress {
                doc_id,
                doc_name: String::new(),
                status: DocumentStatus::Processing,
                summary: String::new(),
                index,
                total,
            });
        entry.doc_name = doc_name;
        entry.index = index;
        entry.total = total;
        if !entry.status.is_terminal() {
            entry.status = DocumentStatus::Processing;
        }
        self.deliver(Delivery::Coalesced);
    }

    /// Append summary text. A chunk for an unseen document creates a
    /// provisional entry positioned after the existing ones.
    pub fn chunk(&mut self, doc_id: &str, content: &str) {
        let next_index = self.documents.len();
        let entry = self
            .documents
            .entry(doc_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(doc_id, "Summary chunk before start; creating provisional entry");
                DocumentProgress {
                    doc_id: doc_id.to_string(),
                    doc_name: String::new(),
                    status: DocumentStatus::Processing,
                    summary: String::new(),
                    index: next_index,
                    total: 0,
                }
            });
        entry.summary.push_str(content);
        self.deliver(Delivery::Immediate);
    }

    /// Finalize a document. The authoritative summary replaces whatever the
    /// chunks accumulated.
    pub fn complete(&mut self, complete: DocSummaryComplete) {
        let status = if complete.from_cache {
            DocumentStatus::Cached
        } else {
            DocumentStatus::Completed
        };
        self.documents.insert(
            complete.doc_id.clone(),
            DocumentProgress {
                doc_id: complete.doc_id,
                doc_name: complete.doc_name,
                status,
                summary: complete.summary,
                index: complete.index,
                total: complete.total,
            },
        );
        self.deliver(Delivery::Immediate);
    }

    /// Mark every non-terminal document as failed.
    pub fn mark_errors(&mut self) {
        let mut changed = false;
        for doc in self.documents.values_mut() {
            if !doc.status.is_terminal() {
                doc.status = DocumentStatus::Error;
                changed = true;
            }
        }
        if changed {
            self.deliver(Delivery::Immediate);
        }
    }

    /// Clear all progress. Publishes only when something was visible.
    pub fn reset(&mut self) {
        let had_state = self.expectation.is_some() || !self.documents.is_empty();
        self.expectation = None;
        self.documents.clear();
        if had_state || self.flush_pending {
            self.deliver(Delivery::Immediate);
        }
    }

    /// Publish coalesced updates, if any.
    pub fn flush(&mut self) {
        if self.flush_pending {
            self.publish();
        }
    }

    fn deliver(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Immediate => self.publish(),
            Delivery::Coalesced => self.flush_pending = true,
        }
    }

    fn publish(&mut self) {
        self.flush_pending = false;
        let snapshot = ProgressSnapshot {
            expectation: self.expectation,
            documents: self.documents.clone(),
        };
        self.tx.send_replace(Arc::new(snapshot));
    }
}
