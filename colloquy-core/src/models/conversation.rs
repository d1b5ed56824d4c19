use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Single,
    TwoStage,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Single => write!(f, "single"),
            SessionMode::TwoStage => write!(f, "two_stage"),
        }
    }
}

impl std::str::FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "single" | "direct" => Ok(SessionMode::Single),
            "two_stage" | "plan_act" => Ok(SessionMode::TwoStage),
            other => Err(format!(
                "Unknown mode '{}'. Must be one of: single, two_stage",
                other
            )),
        }
    }
}

/// Which provider/model pair(s) a conversation runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModelBinding {
    Single {
        provider: String,
        model: String,
    },
    TwoStage {
        plan_provider: String,
        plan_model: String,
        act_provider: String,
        act_model: String,
    },
}

impl ModelBinding {
    pub fn mode(&self) -> SessionMode {
        match self {
            ModelBinding::Single { .. } => SessionMode::Single,
            ModelBinding::TwoStage { .. } => SessionMode::TwoStage,
        }
    }

    /// Provider and model label used for telemetry records.
    ///
    /// Two-stage bindings collapse into one composite label of the form
    /// `plan+act` for both the provider and the model.
    pub fn label(&self) -> (String, String) {
        match self {
            ModelBinding::Single { provider, model } => (provider.clone(), model.clone()),
            ModelBinding::TwoStage {
                plan_provider,
                plan_model,
                act_provider,
                act_model,
            } => (
                format!("{}+{}", plan_provider, act_provider),
                format!("{}+{}", plan_model, act_model),
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub binding: ModelBinding,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub turn_count: u32,
}

impl Conversation {
    pub fn new(id: impl Into<String>, binding: ModelBinding) -> Self {
        Self {
            id: id.into(),
            binding,
            created_at: Utc::now(),
            ended_at: None,
            turn_count: 0,
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.binding.mode()
    }

    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}
