use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Streaming usage counters for one conversation.
///
/// `total_tokens` is always recomputed from the prompt and completion
/// counters, and `average_response_time` is maintained as an incremental
/// mean rather than derived from a stored sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetrics {
    pub conversation_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub message_count: u64,
    pub average_response_time: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ConversationMetrics {
    pub fn new(
        conversation_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            provider: provider.into(),
            model: model.into(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            total_cost: 0.0,
            message_count: 0,
            average_response_time: 0.0,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Fold one exchange into the counters.
    pub fn add_usage(
        &mut self,
        prompt_tokens: u64,
        completion_tokens: u64,
        response_time_ms: f64,
        cost: f64,
    ) {
        self.prompt_tokens += prompt_tokens;
        self.completion_tokens += completion_tokens;
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
        self.message_count += 1;

        let n = self.message_count as f64;
        self.average_response_time =
            (self.average_response_time * (n - 1.0) + response_time_ms) / n;

        self.total_cost += cost;
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_seconds())
    }
}

/// Cross-conversation roll-up produced by the metrics aggregator.
///
/// An empty aggregator yields the default value: all counters zero and no
/// top provider or model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_conversations: usize,
    pub total_messages: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_response_time: f64,
    pub top_provider: Option<String>,
    pub top_model: Option<String>,
}

impl MetricsSummary {
    pub fn average_cost_per_conversation(&self) -> f64 {
        if self.total_conversations > 0 {
            self.total_cost / self.total_conversations as f64
        } else {
            0.0
        }
    }
}
