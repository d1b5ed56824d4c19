mod conversation;
mod history;
mod metrics;
mod trace;

pub use conversation::{ChatMessage, Conversation, ModelBinding, Role, SessionMode};
pub use history::{
    build_preview, record_file_name, ConversationSnapshot, HistoryEntry, HistoryIndexEntry,
    HistorySearch, HistoryStats, SaveOptions, PREVIEW_LENGTH,
};
pub use metrics::{ConversationMetrics, MetricsSummary};
pub use trace::{
    ConversationTrace, Stage, ToolExecution, ToolStatus, TraceEntry, TraceError, TraceEvent,
    TraceFilter, TraceSummary,
};
