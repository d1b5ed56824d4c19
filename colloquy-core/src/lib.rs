pub mod config;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod gateway;
pub mod history;
pub mod metrics;
pub mod models;
pub mod pricing;
pub mod storage;
pub mod traces;

pub use config::{
    get_config_dir, ColloquyConfig, HistoryConfig, LoggingConfig, OrchestrationConfig,
    SessionConfig, StageConfig, StageMode, StageOverrides, TelemetryConfig,
};
pub use coordinator::{
    estimate_tokens, execution_order, CancelHandle, CombinedResult, CoordinatorOptions,
    CoordinatorState, Decomposition, Session, SessionCoordinator, StateChange, StateMachine,
    Subtask,
};
pub use error::{CliErrorDisplay, ColloquyError, ColloquyResult, ErrorKind};
pub use export::{
    create_exporter, CsvExporter, ExportFormat, ExportOptions, Exporter, JsonExporter,
};
pub use gateway::{call_stage, mock_response, DynGateway, HttpGateway, LlmGateway, MOCK_PROVIDER};
pub use history::HistoryIndex;
pub use metrics::MetricsAggregator;
pub use models::{
    ChatMessage, Conversation, ConversationMetrics, ConversationSnapshot, ConversationTrace,
    HistoryEntry, HistoryIndexEntry, HistorySearch, HistoryStats, MetricsSummary, ModelBinding,
    Role, SaveOptions, SessionMode, Stage, ToolExecution, ToolStatus, TraceEntry, TraceError,
    TraceEvent, TraceFilter, TraceSummary,
};
pub use pricing::{ModelRate, RateTable};
pub use storage::{
    resolve_storage_root, FileStorage, MemoryStorage, Storage, TelemetrySnapshot, TelemetryStore,
};
pub use traces::TraceRecorder;
