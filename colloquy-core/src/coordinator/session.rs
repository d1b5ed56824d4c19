use crate::config::SessionConfig;
use crate::models::{ChatMessage, Conversation, SessionMode};

/// A conversation held open by the coordinator.
///
/// The caller owns the session and hands it back by `&mut` for each turn,
/// so one session value cannot run two turns at once.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) conversation: Conversation,
    pub(crate) config: SessionConfig,
    pub(crate) messages: Vec<ChatMessage>,
}

impl Session {
    pub(crate) fn new(id: String, config: SessionConfig, messages: Vec<ChatMessage>) -> Self {
        Self {
            conversation: Conversation::new(id, config.binding()),
            config,
            messages,
        }
    }

    pub fn id(&self) -> &str {
        &self.conversation.id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mode(&self) -> SessionMode {
        self.config.mode()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn turn_count(&self) -> u32 {
        self.conversation.turn_count
    }

    pub fn is_closed(&self) -> bool {
        !self.conversation.is_active()
    }
}
