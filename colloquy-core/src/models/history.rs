use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conversation::{ChatMessage, Conversation, ModelBinding, Role, SessionMode};
use super::trace::ConversationTrace;

pub const PREVIEW_LENGTH: usize = 140;
const PREVIEW_ELLIPSIS: &str = "...";

/// Compact, searchable catalogue entry for one saved conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryIndexEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub mode: SessionMode,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub plan_provider: Option<String>,
    pub plan_model: Option<String>,
    pub act_provider: Option<String>,
    pub act_model: Option<String>,
    pub message_count: usize,
    pub preview: String,
    pub content: String,
    pub file_name: String,
    pub workspace: String,
}

impl HistoryIndexEntry {
    pub fn from_snapshot(snapshot: &ConversationSnapshot, workspace: &str) -> Self {
        let conversation = &snapshot.conversation;
        let now = Utc::now();
        let last_message_at = snapshot
            .messages
            .last()
            .map(|m| m.timestamp)
            .unwrap_or(conversation.created_at);

        let (provider, model, plan_provider, plan_model, act_provider, act_model) =
            match &conversation.binding {
                ModelBinding::Single { provider, model } => (
                    Some(provider.clone()),
                    Some(model.clone()),
                    None,
                    None,
                    None,
                    None,
                ),
                ModelBinding::TwoStage {
                    plan_provider,
                    plan_model,
                    act_provider,
                    act_model,
                } => (
                    None,
                    None,
                    Some(plan_provider.clone()),
                    Some(plan_model.clone()),
                    Some(act_provider.clone()),
                    Some(act_model.clone()),
                ),
            };

        Self {
            id: conversation.id.clone(),
            created_at: conversation.created_at,
            updated_at: now,
            last_message_at,
            mode: conversation.mode(),
            provider,
            model,
            plan_provider,
            plan_model,
            act_provider,
            act_model,
            message_count: snapshot.messages.len(),
            preview: build_preview(&snapshot.messages),
            content: snapshot
                .messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            file_name: record_file_name(&conversation.id),
            workspace: workspace.to_string(),
        }
    }

    /// Every provider this conversation used, in plan/act order.
    pub fn providers(&self) -> Vec<&str> {
        [&self.provider, &self.plan_provider, &self.act_provider]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .collect()
    }

    /// Every model this conversation used, in plan/act order.
    pub fn models(&self) -> Vec<&str> {
        [&self.model, &self.plan_model, &self.act_model]
            .into_iter()
            .filter_map(|m| m.as_deref())
            .collect()
    }
}

/// Full durable record of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub index: HistoryIndexEntry,
    pub messages: Vec<ChatMessage>,
    pub trace: Option<ConversationTrace>,
}

/// Point-in-time copy of a session handed to the history index.
#[derive(Debug, Clone)]
pub struct ConversationSnapshot {
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,
    pub trace: Option<ConversationTrace>,
}

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub workspace: String,
    pub include_trace: bool,
}

impl SaveOptions {
    pub fn new(workspace: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            include_trace: false,
        }
    }

    pub fn with_trace(mut self) -> Self {
        self.include_trace = true;
        self
    }
}

/// History query. Unset fields are ignored, set fields combine with AND.
#[derive(Debug, Clone, Default)]
pub struct HistorySearch {
    pub mode: Option<SessionMode>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub query: Option<String>,
}

impl HistorySearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_date_range(
        mut self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn matches(&self, entry: &HistoryIndexEntry) -> bool {
        if let Some(mode) = self.mode {
            if entry.mode != mode {
                return false;
            }
        }

        if let Some(ref provider) = self.provider {
            if !entry.providers().contains(&provider.as_str()) {
                return false;
            }
        }

        if let Some(ref model) = self.model {
            if !entry.models().contains(&model.as_str()) {
                return false;
            }
        }

        if let Some(since) = self.since {
            if entry.created_at < since {
                return false;
            }
        }

        if let Some(until) = self.until {
            if entry.created_at > until {
                return false;
            }
        }

        if let Some(ref query) = self.query {
            if !entry
                .content
                .to_lowercase()
                .contains(&query.to_lowercase())
            {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_conversations: usize,
    pub total_messages: usize,
    pub single_stage: usize,
    pub two_stage: usize,
}

/// File name of a conversation's full record. Bytes outside
/// `[A-Za-z0-9_-]` are written as `%XX` so any id maps to one plain file.
pub fn record_file_name(conversation_id: &str) -> String {
    let mut name = String::with_capacity(conversation_id.len() + 5);
    for byte in conversation_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    name.push_str(".json");
    name
}

/// Preview text of a conversation: the first assistant message (or the first
/// message of any role), whitespace collapsed and cut at
/// [`PREVIEW_LENGTH`] characters.
pub fn build_preview(messages: &[ChatMessage]) -> String {
    let source = messages
        .iter()
        .find(|m| m.role == Role::Assistant)
        .or_else(|| messages.first());

    let Some(message) = source else {
        return String::new();
    };

    let collapsed = message.content.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() > PREVIEW_LENGTH {
        let truncated: String = collapsed.chars().take(PREVIEW_LENGTH).collect();
        format!("{}{}", truncated, PREVIEW_ELLIPSIS)
    } else {
        collapsed
    }
}
