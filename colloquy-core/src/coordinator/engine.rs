use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::decomposition::Decomposition;
use super::prompts::{act_prompt, direct_prompt, plan_prompt, DIRECT_PLAN_NOTE};
use super::session::Session;
use super::state::{CoordinatorState, StateChange, StateMachine};
use crate::config::{ColloquyConfig, SessionConfig, StageConfig, StageMode};
use crate::error::{ColloquyError, ColloquyResult};
use crate::gateway::{call_stage, DynGateway};
use crate::history::HistoryIndex;
use crate::metrics::MetricsAggregator;
use crate::models::{
    ChatMessage, ConversationSnapshot, HistoryIndexEntry, SaveOptions, Stage, ToolExecution,
    TraceError, TraceEvent,
};
use crate::pricing::RateTable;
use crate::storage::{TelemetrySnapshot, TelemetryStore};
use crate::traces::{TraceRecorder, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_PERSISTED_TRACES};

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub fallback_enabled: bool,
    pub workspace: String,
    pub include_trace_in_history: bool,
    pub max_persisted_traces: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            workspace: String::new(),
            include_trace_in_history: false,
            max_persisted_traces: DEFAULT_MAX_PERSISTED_TRACES,
        }
    }
}

impl CoordinatorOptions {
    pub fn from_config(config: &ColloquyConfig, workspace_root: Option<&Path>) -> Self {
        Self {
            fallback_enabled: config.orchestration.fallback_enabled,
            workspace: config.workspace_tag(workspace_root),
            include_trace_in_history: config.history.include_trace,
            max_persisted_traces: config.telemetry.max_persisted_traces,
        }
    }

    pub fn without_fallback(mut self) -> Self {
        self.fallback_enabled = false;
        self
    }
}

/// Flips the coordinator's cancellation flag from another task.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Outcome of [`SessionCoordinator::orchestrate`].
#[derive(Debug, Clone, Serialize)]
pub struct CombinedResult {
    pub output: String,
    pub decomposition: Decomposition,
    pub fallback: bool,
    pub final_state: CoordinatorState,
    pub state_history: Vec<StateChange>,
    /// Error that sent the orchestration down the fallback path.
    pub error: Option<String>,
}

/// Drives sessions through their stages and fans events out to metrics,
/// traces and history.
///
/// Metrics and trace state sit behind synchronous locks that are never held
/// across an await, so every telemetry update lands as one uninterrupted
/// step between gateway and storage calls.
pub struct SessionCoordinator {
    gateway: DynGateway,
    metrics: Arc<Mutex<MetricsAggregator>>,
    traces: Arc<Mutex<TraceRecorder>>,
    history: HistoryIndex,
    telemetry: Option<TelemetryStore>,
    options: CoordinatorOptions,
    cancelled: Arc<AtomicBool>,
    open_sessions: Mutex<HashSet<String>>,
    last_states: Mutex<Vec<StateChange>>,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionCoordinator {
    pub fn new(gateway: DynGateway, history: HistoryIndex) -> Self {
        Self {
            gateway,
            metrics: Arc::new(Mutex::new(MetricsAggregator::default())),
            traces: Arc::new(Mutex::new(TraceRecorder::new(DEFAULT_MAX_ENTRIES))),
            history,
            telemetry: None,
            options: CoordinatorOptions::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
            open_sessions: Mutex::new(HashSet::new()),
            last_states: Mutex::new(Vec::new()),
            pending_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rates(self, rates: Arc<RateTable>) -> Self {
        *self.metrics.lock() = MetricsAggregator::new(rates);
        self
    }

    pub fn with_max_trace_entries(self, max_entries: usize) -> Self {
        *self.traces.lock() = TraceRecorder::new(max_entries);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryStore) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    pub fn metrics(&self) -> MutexGuard<'_, MetricsAggregator> {
        self.metrics.lock()
    }

    pub fn traces(&self) -> MutexGuard<'_, TraceRecorder> {
        self.traces.lock()
    }

    pub fn history(&self) -> &HistoryIndex {
        &self.history
    }

    /// Transitions of the most recent orchestration.
    pub fn last_state_history(&self) -> Vec<StateChange> {
        self.last_states.lock().clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancelled.clone())
    }

    /// Ask the in-flight turn to stop at its next stage boundary.
    ///
    /// The running gateway call is left alone. The flag is cleared when the
    /// next turn starts.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Load persisted metrics and traces into the archives.
    pub async fn restore_telemetry(&self) -> ColloquyResult<()> {
        let Some(ref telemetry) = self.telemetry else {
            return Ok(());
        };

        let metrics = telemetry.load_metrics().await?;
        let traces = telemetry.load_traces().await?;
        debug!(
            metrics = metrics.len(),
            traces = traces.len(),
            "Restored persisted telemetry"
        );

        self.metrics.lock().restore_archived(metrics);
        self.traces.lock().restore_archived(traces);
        Ok(())
    }

    pub async fn open_session(&self, config: SessionConfig) -> ColloquyResult<Session> {
        self.open_session_with_id(Uuid::new_v4().to_string(), config)
            .await
    }

    /// Open a session under a caller-chosen id.
    ///
    /// When history holds a conversation with this id its messages are
    /// carried over. Its stored configuration is not; `config` always wins.
    pub async fn open_session_with_id(
        &self,
        id: impl Into<String>,
        config: SessionConfig,
    ) -> ColloquyResult<Session> {
        let id = id.into();
        if config.max_turns == 0 {
            return Err(ColloquyError::validation("max_turns must be positive"));
        }

        let messages = match self.history.get(&id).await {
            Ok(Some(record)) => {
                info!(
                    conversation_id = %id,
                    messages = record.messages.len(),
                    "Resuming conversation from history"
                );
                record.messages
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "Could not load saved conversation");
                Vec::new()
            }
        };

        let session = Session::new(id, config, messages);
        let (provider, model) = session.conversation.binding.label();

        self.metrics.lock().start_conversation(session.id(), &provider, &model);
        self.traces.lock().start_trace(session.id(), &provider, &model);
        self.open_sessions.lock().insert(session.id().to_string());

        info!(
            conversation_id = %session.id(),
            mode = %session.mode(),
            provider = %provider,
            model = %model,
            "Session opened"
        );
        Ok(session)
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.open_sessions.lock().contains(id)
    }

    /// Run one user turn and return the assistant's reply.
    ///
    /// On failure the user message is taken back out of the session, an
    /// "Act" entry carrying the error is traced, and the error is returned.
    pub async fn submit_turn(&self, session: &mut Session, user_text: &str) -> ColloquyResult<String> {
        self.cancelled.store(false, Ordering::SeqCst);

        if !self.is_open(session.id()) {
            return Err(ColloquyError::NotFound(session.id().to_string()));
        }

        if session.conversation.turn_count >= session.config.max_turns {
            return Err(ColloquyError::validation(format!(
                "Turn limit of {} reached for conversation {}",
                session.config.max_turns,
                session.id()
            )));
        }

        let started = Instant::now();
        session.conversation.turn_count += 1;
        let turn = session.conversation.turn_count;
        let id = session.id().to_string();
        let history_len = session.messages.len();
        session.messages.push(ChatMessage::user(user_text));

        self.record(
            &id,
            TraceEvent::new(Stage::Observe, turn, elapsed_ms(started)).with_input(user_text),
        );

        let result = self
            .run_stages(session, &session.messages[..history_len], user_text, turn)
            .await;

        match result {
            Ok(output) => {
                let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.metrics.lock().record_message(
                    &id,
                    estimate_tokens(user_text),
                    estimate_tokens(&output),
                    response_time_ms,
                );
                session.messages.push(ChatMessage::assistant(output.clone()));
                self.persist_in_background();

                debug!(conversation_id = %id, turn, response_time_ms, "Turn complete");
                Ok(output)
            }
            Err(e) => {
                session.messages.truncate(history_len);
                self.record(
                    &id,
                    TraceEvent::new(Stage::Act, turn, elapsed_ms(started))
                        .with_input(user_text)
                        .with_error(TraceError::from(&e)),
                );
                e.log();
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        session: &Session,
        history: &[ChatMessage],
        task: &str,
        turn: u32,
    ) -> ColloquyResult<String> {
        let id = session.id();
        let debug_mode = session.config.debug_mode;

        match &session.config.stages {
            StageMode::Single(stage) => {
                let plan_started = Instant::now();
                self.record(
                    id,
                    TraceEvent::new(Stage::Plan, turn, elapsed_ms(plan_started))
                        .with_input(task)
                        .with_output(DIRECT_PLAN_NOTE),
                );

                self.check_cancelled(Stage::Act)?;
                let prompt = direct_prompt(history, task);
                let output = self
                    .run_stage(id, Stage::Act, turn, prompt, stage, debug_mode)
                    .await?;

                self.record_verify(id, turn, &output);
                Ok(output)
            }
            StageMode::TwoStage { plan, act } => {
                self.check_cancelled(Stage::Plan)?;
                let plan_output = self
                    .run_stage(id, Stage::Plan, turn, plan_prompt(history, task), plan, debug_mode)
                    .await?;

                self.check_cancelled(Stage::Act)?;
                let prompt = act_prompt(history, task, &plan_output);
                let output = self
                    .run_stage(id, Stage::Act, turn, prompt, act, debug_mode)
                    .await?;

                self.record_verify(id, turn, &output);
                Ok(output)
            }
        }
    }

    async fn run_stage(
        &self,
        id: &str,
        stage: Stage,
        turn: u32,
        prompt: String,
        config: &StageConfig,
        debug_mode: bool,
    ) -> ColloquyResult<String> {
        if debug_mode {
            debug!(conversation_id = %id, stage = %stage, prompt = %prompt, "Stage prompt");
        }

        let started = Instant::now();
        let output = call_stage(self.gateway.clone(), prompt.clone(), config.clone(), stage).await?;

        self.record(
            id,
            TraceEvent::new(stage, turn, elapsed_ms(started))
                .with_input(prompt)
                .with_output(output.clone())
                .with_metadata(serde_json::json!({
                    "provider": config.provider,
                    "model": config.model,
                })),
        );
        Ok(output)
    }

    fn record_verify(&self, id: &str, turn: u32, output: &str) {
        let verified = !output.trim().is_empty();
        self.record(
            id,
            TraceEvent::new(Stage::Verify, turn, 0).with_metadata(serde_json::json!({
                "non_empty": verified,
                "output_chars": output.chars().count(),
            })),
        );
    }

    fn check_cancelled(&self, next: Stage) -> ColloquyResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(ColloquyError::Cancelled(next.to_string()));
        }
        Ok(())
    }

    fn record(&self, id: &str, event: TraceEvent) -> String {
        self.traces.lock().record_state_transition(id, event)
    }

    /// Attach a tool run to the session's latest "Act" entry.
    pub fn record_tool_execution(&self, id: &str, execution: ToolExecution) -> bool {
        self.traces.lock().record_tool_execution(id, execution)
    }

    /// Run a task through the full state machine.
    ///
    /// Any failure once the machine is running moves it to `Error`. With
    /// fallback enabled the task is then retried as one direct call and the
    /// result is tagged as a fallback; otherwise the error is returned.
    pub async fn orchestrate(
        &self,
        session: &mut Session,
        task: &str,
    ) -> ColloquyResult<CombinedResult> {
        if !self.is_open(session.id()) {
            return Err(ColloquyError::NotFound(session.id().to_string()));
        }

        if session.conversation.turn_count >= session.config.max_turns {
            return Err(ColloquyError::validation(format!(
                "Turn limit of {} reached for conversation {}",
                session.config.max_turns,
                session.id()
            )));
        }

        let mut machine = StateMachine::new();
        let decomposition = Decomposition::for_task(task, session.mode());

        let outcome = self
            .run_orchestration(&mut machine, session, task, &decomposition)
            .await;

        match outcome {
            Ok(output) => {
                machine.transition(CoordinatorState::Complete)?;
                let state_history = self.remember_states(&machine);
                Ok(CombinedResult {
                    output,
                    decomposition,
                    fallback: false,
                    final_state: CoordinatorState::Complete,
                    state_history,
                    error: None,
                })
            }
            Err(e) => {
                machine.fail(e.to_string());
                let state_history = self.remember_states(&machine);
                warn!(
                    conversation_id = %session.id(),
                    error_code = e.error_code(),
                    fallback = self.options.fallback_enabled,
                    "Orchestration failed"
                );

                if !self.options.fallback_enabled {
                    return Err(e);
                }

                let output = self.run_fallback(session, task).await?;
                Ok(CombinedResult {
                    output,
                    decomposition,
                    fallback: true,
                    final_state: machine.current(),
                    state_history,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    async fn run_orchestration(
        &self,
        machine: &mut StateMachine,
        session: &mut Session,
        task: &str,
        decomposition: &Decomposition,
    ) -> ColloquyResult<String> {
        machine.transition_with(
            CoordinatorState::Decomposing,
            Some(format!("{} subtask(s)", decomposition.subtasks.len())),
        )?;
        machine.transition_with(
            CoordinatorState::Delegating,
            Some(decomposition.execution_order.join(" -> ")),
        )?;
        machine.transition(CoordinatorState::Processing)?;

        self.submit_turn(session, task).await
    }

    async fn run_fallback(&self, session: &mut Session, task: &str) -> ColloquyResult<String> {
        let id = session.id().to_string();
        let turn = session.conversation.turn_count.max(1);
        let stage = session.config.answer_stage().clone();
        let started = Instant::now();

        let result = match self.check_cancelled(Stage::Act) {
            Ok(()) => {
                let prompt = direct_prompt(&session.messages, task);
                call_stage(self.gateway.clone(), prompt, stage, Stage::Act).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(output) => {
                let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.record(
                    &id,
                    TraceEvent::new(Stage::Act, turn, elapsed_ms(started))
                        .with_input(task)
                        .with_output(output.clone())
                        .with_metadata(serde_json::json!({ "fallback": true })),
                );
                self.metrics.lock().record_message(
                    &id,
                    estimate_tokens(task),
                    estimate_tokens(&output),
                    response_time_ms,
                );

                session.messages.push(ChatMessage::user(task));
                session.messages.push(ChatMessage::assistant(output.clone()));
                self.persist_in_background();

                info!(conversation_id = %id, "Fallback response returned");
                Ok(output)
            }
            Err(e) => {
                self.record(
                    &id,
                    TraceEvent::new(Stage::Act, turn, elapsed_ms(started))
                        .with_input(task)
                        .with_error(TraceError::from(&e))
                        .with_metadata(serde_json::json!({ "fallback": true })),
                );
                e.log();
                Err(e)
            }
        }
    }

    fn remember_states(&self, machine: &StateMachine) -> Vec<StateChange> {
        let history = machine.history().to_vec();
        *self.last_states.lock() = history.clone();
        history
    }

    /// Finalize a session's telemetry and save it to history.
    ///
    /// Never fails: storage problems are logged. Returns the saved index
    /// entry when the conversation had messages and the save succeeded.
    pub async fn close_session(&self, session: &mut Session) -> Option<HistoryIndexEntry> {
        let id = session.id().to_string();
        session.conversation.end();

        self.metrics.lock().end_conversation(&id);
        let trace = {
            let mut traces = self.traces.lock();
            traces.end_trace(&id);
            let trace = traces.get_trace(&id).cloned();
            trace
        };
        self.open_sessions.lock().remove(&id);

        let mut saved = None;
        if !session.messages.is_empty() {
            let snapshot = ConversationSnapshot {
                conversation: session.conversation.clone(),
                messages: session.messages.clone(),
                trace,
            };
            let mut options = SaveOptions::new(self.options.workspace.clone());
            options.include_trace = self.options.include_trace_in_history;

            match self.history.save_conversation(&snapshot, &options).await {
                Ok(entry) => saved = Some(entry),
                Err(e) => warn!(conversation_id = %id, error = %e, "Failed to save conversation"),
            }
        }

        if let Err(e) = self.flush().await {
            warn!(conversation_id = %id, error = %e, "Failed to persist telemetry");
        }

        info!(conversation_id = %id, turns = session.turn_count(), "Session closed");
        saved
    }

    fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            metrics: self.metrics.lock().get_all_metrics(),
            traces: self
                .traces
                .lock()
                .persistable_traces(self.options.max_persisted_traces),
        }
    }

    /// Start a best-effort telemetry write. Nothing is durable until
    /// [`flush`](Self::flush) returns.
    fn persist_in_background(&self) {
        let Some(telemetry) = self.telemetry.clone() else {
            return;
        };

        let snapshot = self.telemetry_snapshot();
        let handle = tokio::spawn(async move {
            if let Err(e) = telemetry.write(&snapshot).await {
                warn!(error = %e, "Background telemetry write failed");
            }
        });

        let mut pending = self.pending_writes.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for background writes, then write the current telemetry.
    pub async fn flush(&self) -> ColloquyResult<()> {
        let Some(ref telemetry) = self.telemetry else {
            return Ok(());
        };

        let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending_writes.lock());
        for handle in pending {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background telemetry task failed");
            }
        }

        let snapshot = self.telemetry_snapshot();
        telemetry.write(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("ééééé"), 2);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = ColloquyConfig::default();
        config.orchestration.fallback_enabled = false;
        config.telemetry.max_persisted_traces = 7;

        let options = CoordinatorOptions::from_config(&config, Some(Path::new("/work/demo")));
        assert!(!options.fallback_enabled);
        assert_eq!(options.workspace, "demo");
        assert_eq!(options.max_persisted_traces, 7);
        assert!(CoordinatorOptions::default().fallback_enabled);
    }
}
