//! Conversation configuration.

use serde::{Deserialize, Serialize};

use crate::ConversationId;

/// Retrieval settings attached to a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default)]
    pub knowledge_base_ids: Vec<String>,
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub web_search: bool,
    /// Locked conversations keep their retrieval scope fixed.
    #[serde(default)]
    pub locked: bool,
    /// Where the conversation was started from (e.g. "cli", "notes").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ConversationConfig {
    pub fn apply(&mut self, patch: &ConversationConfigPatch) {
        if let Some(ids) = &patch.knowledge_base_ids {
            self.knowledge_base_ids.clone_from(ids);
        }
        if let Some(ids) = &patch.document_ids {
            self.document_ids.clone_from(ids);
        }
        if let Some(web_search) = patch.web_search {
            self.web_search = web_search;
        }
        if let Some(locked) = patch.locked {
            self.locked = locked;
        }
        if let Some(source) = &patch.source {
            self.source = Some(source.clone());
        }
    }
}

/// Partial configuration update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ConversationConfigPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.knowledge_base_ids.is_none()
            && self.document_ids.is_none()
            && self.web_search.is_none()
            && self.locked.is_none()
            && self.source.is_none()
    }

    /// Fold a later patch into this one; later values win.
    pub fn merge(&mut self, later: ConversationConfigPatch) {
        if later.knowledge_base_ids.is_some() {
            self.knowledge_base_ids = later.knowledge_base_ids;
        }
        if later.document_ids.is_some() {
            self.document_ids = later.document_ids;
        }
        if later.web_search.is_some() {
            self.web_search = later.web_search;
        }
        if later.locked.is_some() {
            self.locked = later.locked;
        }
        if later.source.is_some() {
            self.source = later.source;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub config: ConversationConfig,
}
