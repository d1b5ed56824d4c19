use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::error::ColloquyError;

/// Lifecycle label of one recorded stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Observe,
    Plan,
    Act,
    Verify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Observe => "Observe",
            Stage::Plan => "Plan",
            Stage::Act => "Act",
            Stage::Verify => "Verify",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "observe" => Ok(Stage::Observe),
            "plan" => Ok(Stage::Plan),
            "act" => Ok(Stage::Act),
            "verify" => Ok(Stage::Verify),
            other => Err(format!(
                "Unknown stage '{}'. Must be one of: observe, plan, act, verify",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failure,
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolStatus::Success => write!(f, "success"),
            ToolStatus::Failure => write!(f, "failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub name: String,
    pub input: BTreeMap<String, serde_json::Value>,
    pub output: Option<String>,
    pub duration_ms: u64,
    pub status: ToolStatus,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ToolExecution {
    pub fn success(
        name: impl Into<String>,
        input: BTreeMap<String, serde_json::Value>,
        output: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            output: Some(output.into()),
            duration_ms,
            status: ToolStatus::Success,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        name: impl Into<String>,
        input: BTreeMap<String, serde_json::Value>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            output: None,
            duration_ms,
            status: ToolStatus::Failure,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceError {
    pub message: String,
    pub kind: String,
    pub stack: Option<String>,
    pub context: Option<serde_json::Value>,
}

impl TraceError {
    pub fn new(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: kind.into(),
            stack: None,
            context: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

impl From<&ColloquyError> for TraceError {
    fn from(err: &ColloquyError) -> Self {
        TraceError::new(err.to_string(), err.kind().as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub id: String,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub stage: Stage,
    pub turn: u32,
    pub duration_ms: u64,
    pub input: Option<String>,
    pub output: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolExecution>,
    pub error: Option<TraceError>,
    pub metadata: Option<serde_json::Value>,
}

impl TraceEntry {
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }
}

/// Ordered, capped event log of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTrace {
    pub conversation_id: String,
    pub provider: String,
    pub model: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_turns: u32,
    pub entries: VecDeque<TraceEntry>,
}

impl ConversationTrace {
    pub fn new(
        conversation_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            provider: provider.into(),
            model: model.into(),
            start_time: Utc::now(),
            end_time: None,
            total_turns: 0,
            entries: VecDeque::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn tool_execution_count(&self) -> usize {
        self.entries.iter().map(|e| e.tools.len()).sum()
    }
}

/// One state transition to be appended to a conversation trace.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub stage: Stage,
    pub turn: u32,
    pub duration_ms: u64,
    pub input: Option<String>,
    pub output: Option<String>,
    pub tools: Vec<ToolExecution>,
    pub error: Option<TraceError>,
    pub metadata: Option<serde_json::Value>,
}

impl TraceEvent {
    pub fn new(stage: Stage, turn: u32, duration_ms: u64) -> Self {
        Self {
            stage,
            turn,
            duration_ms,
            input: None,
            output: None,
            tools: Vec::new(),
            error: None,
            metadata: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolExecution>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_error(mut self, error: TraceError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Ad-hoc query over recorded entries. Every populated field must match.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    pub conversation_id: Option<String>,
    pub stage: Option<Stage>,
    pub min_turn: Option<u32>,
    pub max_turn: Option<u32>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub has_error: Option<bool>,
    pub has_tools: Option<bool>,
}

impl TraceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_turn_range(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_turn = min;
        self.max_turn = max;
        self
    }

    pub fn with_time_range(
        mut self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn with_errors(mut self, has_error: bool) -> Self {
        self.has_error = Some(has_error);
        self
    }

    pub fn with_tools(mut self, has_tools: bool) -> Self {
        self.has_tools = Some(has_tools);
        self
    }

    pub fn matches(&self, entry: &TraceEntry) -> bool {
        if let Some(ref id) = self.conversation_id {
            if &entry.conversation_id != id {
                return false;
            }
        }

        if let Some(stage) = self.stage {
            if entry.stage != stage {
                return false;
            }
        }

        if let Some(min) = self.min_turn {
            if entry.turn < min {
                return false;
            }
        }

        if let Some(max) = self.max_turn {
            if entry.turn > max {
                return false;
            }
        }

        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }

        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }

        if let Some(has_error) = self.has_error {
            if entry.has_error() != has_error {
                return false;
            }
        }

        if let Some(has_tools) = self.has_tools {
            if entry.has_tools() != has_tools {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub total_traces: usize,
    pub total_turns: u64,
    pub total_entries: usize,
    pub average_duration_ms: f64,
    pub most_common_stage: Option<Stage>,
    pub error_count: usize,
    pub total_tool_executions: usize,
    pub success_rate: f64,
}

impl Default for TraceSummary {
    fn default() -> Self {
        Self {
            total_traces: 0,
            total_turns: 0,
            total_entries: 0,
            average_duration_ms: 0.0,
            most_common_stage: None,
            error_count: 0,
            total_tool_executions: 0,
            success_rate: 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(stage: Stage, turn: u32) -> TraceEntry {
        TraceEntry {
            id: format!("c1-{}", turn),
            conversation_id: "c1".to_string(),
            timestamp: Utc::now(),
            stage,
            turn,
            duration_ms: 10,
            input: None,
            output: None,
            tools: Vec::new(),
            error: None,
            metadata: None,
        }
    }

    #[test]
    fn test_stage_display_and_parse() {
        assert_eq!(Stage::Observe.to_string(), "Observe");
        assert_eq!("act".parse::<Stage>(), Ok(Stage::Act));
        assert_eq!("Verify".parse::<Stage>(), Ok(Stage::Verify));
        assert!("reflect".parse::<Stage>().is_err());
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = TraceFilter::new();
        assert!(filter.matches(&entry(Stage::Plan, 1)));
    }

    #[test]
    fn test_filter_turn_range_is_inclusive() {
        let filter = TraceFilter::new().with_turn_range(Some(2), Some(3));

        assert!(!filter.matches(&entry(Stage::Act, 1)));
        assert!(filter.matches(&entry(Stage::Act, 2)));
        assert!(filter.matches(&entry(Stage::Act, 3)));
        assert!(!filter.matches(&entry(Stage::Act, 4)));
    }

    #[test]
    fn test_filter_fields_compose_with_and() {
        let filter = TraceFilter::new()
            .with_conversation("c1")
            .with_stage(Stage::Act)
            .with_errors(true);

        let mut failing = entry(Stage::Act, 1);
        failing.error = Some(TraceError::new("boom", "transport"));

        assert!(filter.matches(&failing));
        assert!(!filter.matches(&entry(Stage::Act, 1)));

        let mut other_conversation = failing.clone();
        other_conversation.conversation_id = "c2".to_string();
        assert!(!filter.matches(&other_conversation));
    }

    #[test]
    fn test_filter_time_range() {
        let e = entry(Stage::Observe, 1);
        let inclusive = TraceFilter::new().with_time_range(Some(e.timestamp), Some(e.timestamp));
        assert!(inclusive.matches(&e));

        let later = TraceFilter::new()
            .with_time_range(Some(e.timestamp + Duration::seconds(1)), None);
        assert!(!later.matches(&e));
    }

    #[test]
    fn test_filter_has_tools() {
        let mut with_tool = entry(Stage::Act, 1);
        with_tool.tools.push(ToolExecution::success(
            "read_file",
            BTreeMap::new(),
            "ok",
            5,
        ));

        let filter = TraceFilter::new().with_tools(true);
        assert!(filter.matches(&with_tool));
        assert!(!filter.matches(&entry(Stage::Act, 1)));
    }

    #[test]
    fn test_trace_error_from_colloquy_error() {
        let err = ColloquyError::Cancelled("Act".to_string());
        let trace_error = TraceError::from(&err);
        assert_eq!(trace_error.kind, "cancelled");
        assert!(trace_error.message.contains("E1003"));
    }

    #[test]
    fn test_summary_default_is_optimistic() {
        let summary = TraceSummary::default();
        assert_eq!(summary.success_rate, 100.0);
        assert_eq!(summary.total_entries, 0);
    }
}
