use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{debug, trace, warn};

use crate::models::{
    ConversationTrace, Stage, ToolExecution, TraceEntry, TraceEvent, TraceFilter, TraceSummary,
};

pub const DEFAULT_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_MAX_PERSISTED_TRACES: usize = 50;

const UNKNOWN_LABEL: &str = "unknown";

static ENTRY_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_entry_id(conversation_id: &str) -> String {
    let n = ENTRY_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{}-{}", conversation_id, n)
}

/// Bounded per-conversation event log.
///
/// Each live trace keeps at most `max_entries` entries; once the cap is
/// exceeded the single oldest entry is dropped. Ended traces move to a
/// flat archive and are never trimmed further in memory.
pub struct TraceRecorder {
    max_entries: usize,
    live: Vec<ConversationTrace>,
    archived: Vec<ConversationTrace>,
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl TraceRecorder {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            live: Vec::new(),
            archived: Vec::new(),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Create an empty live trace, replacing any live trace with the same id.
    pub fn start_trace(&mut self, id: &str, provider: &str, model: &str) {
        let trace = ConversationTrace::new(id, provider, model);

        match self.live.iter_mut().find(|t| t.conversation_id == id) {
            Some(existing) => {
                debug!(conversation_id = %id, "Restarting live trace");
                *existing = trace;
            }
            None => self.live.push(trace),
        }
    }

    pub fn end_trace(&mut self, id: &str) {
        let Some(pos) = self.live.iter().position(|t| t.conversation_id == id) else {
            return;
        };

        let mut trace = self.live.remove(pos);
        trace.end_time = Some(Utc::now());
        debug!(
            conversation_id = %id,
            entries = trace.entries.len(),
            turns = trace.total_turns,
            "Trace archived"
        );
        self.archived.push(trace);
    }

    /// Append one entry and return its id.
    ///
    /// A missing live trace is created on the fly with an "unknown"
    /// provider and model so the event is never lost.
    pub fn record_state_transition(&mut self, id: &str, event: TraceEvent) -> String {
        let max_entries = self.max_entries;
        let trace = match self.live.iter().position(|t| t.conversation_id == id) {
            Some(pos) => &mut self.live[pos],
            None => {
                warn!(conversation_id = %id, "No live trace, creating one");
                self.live
                    .push(ConversationTrace::new(id, UNKNOWN_LABEL, UNKNOWN_LABEL));
                let last = self.live.len() - 1;
                &mut self.live[last]
            }
        };

        let entry = TraceEntry {
            id: next_entry_id(id),
            conversation_id: id.to_string(),
            timestamp: Utc::now(),
            stage: event.stage,
            turn: event.turn,
            duration_ms: event.duration_ms,
            input: event.input,
            output: event.output,
            tools: event.tools,
            error: event.error,
            metadata: event.metadata,
        };
        let entry_id = entry.id.clone();

        trace.total_turns = trace.total_turns.max(entry.turn);
        trace.entries.push_back(entry);
        if trace.entries.len() > max_entries {
            trace.entries.pop_front();
        }

        trace!(
            conversation_id = %id,
            stage = %event.stage,
            turn = event.turn,
            entry_id = %entry_id,
            "Recorded state transition"
        );
        entry_id
    }

    /// Attach a tool run to the latest "Act" entry of a live trace.
    ///
    /// Returns false when there is no such entry; the execution is dropped.
    pub fn record_tool_execution(&mut self, id: &str, execution: ToolExecution) -> bool {
        let target = self
            .live
            .iter_mut()
            .find(|t| t.conversation_id == id)
            .and_then(|t| t.entries.iter_mut().rev().find(|e| e.stage == Stage::Act));

        match target {
            Some(entry) => {
                trace!(conversation_id = %id, tool = %execution.name, "Recorded tool execution");
                entry.tools.push(execution);
                true
            }
            None => false,
        }
    }

    /// Matching entries across archived then live traces, flattened.
    pub fn filter_traces(&self, filter: &TraceFilter) -> Vec<TraceEntry> {
        self.iter_all()
            .flat_map(|t| t.entries.iter())
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn get_summary(&self) -> TraceSummary {
        summarize(self.iter_all())
    }

    /// Live trace for `id`, falling back to the most recent archived one.
    pub fn get_trace(&self, id: &str) -> Option<&ConversationTrace> {
        self.live
            .iter()
            .find(|t| t.conversation_id == id)
            .or_else(|| self.archived.iter().rev().find(|t| t.conversation_id == id))
    }

    /// Archived traces followed by live traces.
    pub fn get_all_traces(&self) -> Vec<ConversationTrace> {
        self.iter_all().cloned().collect()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn clear_all_traces(&mut self) {
        self.live.clear();
        self.archived.clear();
    }

    /// Ended traces eligible for durable storage: the newest `max` of them.
    pub fn persistable_traces(&self, max: usize) -> Vec<ConversationTrace> {
        let mut ended: Vec<ConversationTrace> = self
            .archived
            .iter()
            .filter(|t| t.end_time.is_some())
            .cloned()
            .collect();

        if ended.len() > max {
            ended.drain(..ended.len() - max);
        }
        ended
    }

    /// Seed the archive with previously persisted traces.
    pub fn restore_archived(&mut self, traces: Vec<ConversationTrace>) {
        self.archived.extend(traces);
    }

    fn iter_all(&self) -> impl Iterator<Item = &ConversationTrace> {
        self.archived.iter().chain(self.live.iter())
    }
}

/// Roll a set of traces up into one summary.
///
/// The most common stage ignores "Observe" and ties go to whichever stage
/// was seen first. With no entries at all the success rate is 100.
pub fn summarize<'a>(traces: impl IntoIterator<Item = &'a ConversationTrace>) -> TraceSummary {
    let mut summary = TraceSummary::default();
    let mut total_duration: u64 = 0;
    let mut stage_order: Vec<Stage> = Vec::new();
    let mut stage_counts: HashMap<Stage, usize> = HashMap::new();

    for trace in traces {
        summary.total_traces += 1;
        summary.total_turns += u64::from(trace.total_turns);

        for entry in &trace.entries {
            summary.total_entries += 1;
            total_duration += entry.duration_ms;
            summary.total_tool_executions += entry.tools.len();
            if entry.has_error() {
                summary.error_count += 1;
            }

            if entry.stage != Stage::Observe {
                let count = stage_counts.entry(entry.stage).or_insert(0);
                if *count == 0 {
                    stage_order.push(entry.stage);
                }
                *count += 1;
            }
        }
    }

    if summary.total_entries > 0 {
        let entries = summary.total_entries as f64;
        summary.average_duration_ms = total_duration as f64 / entries;
        summary.success_rate = (entries - summary.error_count as f64) / entries * 100.0;
    }

    let mut best: Option<(Stage, usize)> = None;
    for stage in stage_order {
        let count = stage_counts[&stage];
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((stage, count));
        }
    }
    summary.most_common_stage = best.map(|(stage, _)| stage);

    summary
}
