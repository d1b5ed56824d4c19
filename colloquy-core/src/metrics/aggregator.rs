use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, trace, warn};

use crate::models::{ConversationMetrics, MetricsSummary};
use crate::pricing::RateTable;

/// Streaming per-conversation usage accounting.
///
/// Live records are kept in start order. Ending a conversation stamps its
/// end time and moves it to a flat, append-only archive. Nothing here is
/// async: every mutation completes without a suspension point.
pub struct MetricsAggregator {
    rates: Arc<RateTable>,
    live: Vec<ConversationMetrics>,
    archived: Vec<ConversationMetrics>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(Arc::new(RateTable::default()))
    }
}

impl MetricsAggregator {
    pub fn new(rates: Arc<RateTable>) -> Self {
        Self {
            rates,
            live: Vec::new(),
            archived: Vec::new(),
        }
    }

    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    /// Create a zeroed live record. An existing live record with the same id
    /// is replaced.
    pub fn start_conversation(&mut self, id: &str, provider: &str, model: &str) {
        let record = ConversationMetrics::new(id, provider, model);

        match self.live.iter_mut().find(|m| m.conversation_id == id) {
            Some(existing) => {
                debug!(conversation_id = %id, "Restarting live metrics record");
                *existing = record;
            }
            None => self.live.push(record),
        }

        trace!(conversation_id = %id, provider = %provider, model = %model, "Metrics started");
    }

    /// Fold one turn into the live record. Unknown ids are logged and ignored.
    pub fn record_message(
        &mut self,
        id: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        response_time_ms: f64,
    ) {
        let Some(record) = self.live.iter_mut().find(|m| m.conversation_id == id) else {
            warn!(conversation_id = %id, "No live metrics record, dropping message usage");
            return;
        };

        let cost = self.rates.calculate_cost(
            &record.provider,
            &record.model,
            prompt_tokens,
            completion_tokens,
        );
        record.add_usage(prompt_tokens, completion_tokens, response_time_ms, cost);

        trace!(
            conversation_id = %id,
            total_tokens = record.total_tokens,
            total_cost = record.total_cost,
            "Recorded message usage"
        );
    }

    pub fn end_conversation(&mut self, id: &str) {
        let Some(pos) = self.live.iter().position(|m| m.conversation_id == id) else {
            return;
        };

        let mut record = self.live.remove(pos);
        record.end_time = Some(Utc::now());
        debug!(
            conversation_id = %id,
            messages = record.message_count,
            total_cost = record.total_cost,
            "Metrics archived"
        );
        self.archived.push(record);
    }

    /// Live record for `id`, falling back to the most recent archived one.
    pub fn get_metrics(&self, id: &str) -> Option<&ConversationMetrics> {
        self.live
            .iter()
            .find(|m| m.conversation_id == id)
            .or_else(|| self.archived.iter().rev().find(|m| m.conversation_id == id))
    }

    /// Archived records followed by live records.
    pub fn get_all_metrics(&self) -> Vec<ConversationMetrics> {
        self.archived
            .iter()
            .chain(self.live.iter())
            .cloned()
            .collect()
    }

    pub fn archived(&self) -> &[ConversationMetrics] {
        &self.archived
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn get_summary(&self) -> MetricsSummary {
        summarize(&self.get_all_metrics())
    }

    pub fn clear_all_metrics(&mut self) {
        self.live.clear();
        self.archived.clear();
    }

    /// Seed the archive with previously persisted records.
    pub fn restore_archived(&mut self, records: Vec<ConversationMetrics>) {
        self.archived.extend(records);
    }
}

/// Roll a set of records up into one summary.
///
/// The response time is the mean of per-conversation averages. Ties for the
/// top provider or model go to whichever was seen first.
pub fn summarize(records: &[ConversationMetrics]) -> MetricsSummary {
    if records.is_empty() {
        return MetricsSummary::default();
    }

    let total_messages = records.iter().map(|m| m.message_count).sum();
    let total_tokens = records.iter().map(|m| m.total_tokens).sum();
    let total_cost = records.iter().map(|m| m.total_cost).sum();
    let average_response_time = records
        .iter()
        .map(|m| m.average_response_time)
        .sum::<f64>()
        / records.len() as f64;

    MetricsSummary {
        total_conversations: records.len(),
        total_messages,
        total_tokens,
        total_cost,
        average_response_time,
        top_provider: most_frequent(records.iter().map(|m| m.provider.as_str())),
        top_model: most_frequent(records.iter().map(|m| m.model.as_str())),
    }
}

fn most_frequent<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();

    for value in values {
        let count = counts.entry(value).or_insert(0);
        if *count == 0 {
            order.push(value);
        }
        *count += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for value in order {
        let count = counts[value];
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((value, count));
        }
    }

    best.map(|(value, _)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::ModelRate;

    #[test]
    fn test_single_message_scenario() {
        let mut aggregator = MetricsAggregator::default();
        aggregator.start_conversation("c1", "openai", "gpt-4");
        aggregator.record_message("c1", 1000, 2000, 1500.0);

        let metrics = aggregator.get_metrics("c1").unwrap();
        assert_eq!(metrics.total_tokens, 3000);
        assert!((metrics.total_cost - 0.15).abs() < 1e-9);
        assert_eq!(metrics.message_count, 1);
        assert_eq!(metrics.average_response_time, 1500.0);
    }

    #[test]
    fn test_three_message_average() {
        let mut aggregator = MetricsAggregator::default();
        aggregator.start_conversation("c1", "openai", "gpt-4");
        for ms in [1000.0, 2000.0, 3000.0] {
            aggregator.record_message("c1", 10, 10, ms);
        }

        let metrics = aggregator.get_metrics("c1").unwrap();
        assert_eq!(metrics.average_response_time, 2000.0);
        assert_eq!(metrics.message_count, 3);
    }

    #[test]
    fn test_incremental_average_matches_mean() {
        let samples = [12.5, 900.0, 3.25, 47.0, 1234.5, 0.5, 88.0];
        let mut aggregator = MetricsAggregator::default();
        aggregator.start_conversation("c1", "mock", "echo");
        for ms in samples {
            aggregator.record_message("c1", 1, 1, ms);
        }

        let expected = samples.iter().sum::<f64>() / samples.len() as f64;
        let actual = aggregator.get_metrics("c1").unwrap().average_response_time;
        assert!((actual - expected).abs() < 1e-9);
    }

    #[test]
    fn test_record_without_live_record_is_ignored() {
        let mut aggregator = MetricsAggregator::default();
        aggregator.record_message("ghost", 100, 100, 10.0);

        assert!(aggregator.get_metrics("ghost").is_none());
        assert!(aggregator.get_all_metrics().is_empty());
    }

    #[test]
    fn test_start_twice_overwrites() {
        let mut aggregator = MetricsAggregator::default();
        aggregator.start_conversation("c1", "openai", "gpt-4");
        aggregator.record_message("c1", 100, 100, 10.0);
        aggregator.start_conversation("c1", "anthropic", "claude-3-opus-20240229");

        assert_eq!(aggregator.live_count(), 1);
        let metrics = aggregator.get_metrics("c1").unwrap();
        assert_eq!(metrics.provider, "anthropic");
        assert_eq!(metrics.message_count, 0);
    }

    #[test]
    fn test_end_moves_to_archive() {
        let mut aggregator = MetricsAggregator::default();
        aggregator.start_conversation("c1", "openai", "gpt-4");
        aggregator.start_conversation("c2", "openai", "gpt-4o");
        aggregator.end_conversation("c1");
        aggregator.end_conversation("unknown");

        assert_eq!(aggregator.live_count(), 1);
        assert_eq!(aggregator.archived().len(), 1);
        assert!(aggregator.archived()[0].end_time.is_some());

        let ids: Vec<_> = aggregator
            .get_all_metrics()
            .into_iter()
            .map(|m| m.conversation_id)
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);

        // Recording against an archived conversation is dropped.
        aggregator.record_message("c1", 10, 10, 5.0);
        assert_eq!(aggregator.get_metrics("c1").unwrap().message_count, 0);
    }

    #[test]
    fn test_cost_uses_provider_default() {
        let rates = RateTable::empty().with_rate(ModelRate::new("acme", "default", 1.0, 1.0));
        let mut aggregator = MetricsAggregator::new(Arc::new(rates));
        aggregator.start_conversation("c1", "acme", "anything");
        aggregator.start_conversation("c2", "other", "anything");
        aggregator.record_message("c1", 1000, 1000, 1.0);
        aggregator.record_message("c2", 1000, 1000, 1.0);

        assert!((aggregator.get_metrics("c1").unwrap().total_cost - 2.0).abs() < 1e-9);
        assert_eq!(aggregator.get_metrics("c2").unwrap().total_cost, 0.0);
    }

    #[test]
    fn test_summary_empty_is_zeroed() {
        let aggregator = MetricsAggregator::default();
        let summary = aggregator.get_summary();

        assert_eq!(summary, MetricsSummary::default());
        assert!(!summary.average_response_time.is_nan());
    }

    #[test]
    fn test_summary_mean_of_means_and_ties() {
        let mut aggregator = MetricsAggregator::default();
        aggregator.start_conversation("c1", "anthropic", "claude-3-opus-20240229");
        aggregator.start_conversation("c2", "openai", "gpt-4");
        aggregator.record_message("c1", 100, 100, 100.0);
        aggregator.record_message("c1", 100, 100, 300.0);
        aggregator.record_message("c2", 100, 100, 1000.0);

        let summary = aggregator.get_summary();
        assert_eq!(summary.total_conversations, 2);
        assert_eq!(summary.total_messages, 3);
        assert_eq!(summary.total_tokens, 600);
        // (200 + 1000) / 2, not (100 + 300 + 1000) / 3
        assert!((summary.average_response_time - 600.0).abs() < 1e-9);
        assert_eq!(summary.top_provider.as_deref(), Some("anthropic"));
        assert_eq!(summary.top_model.as_deref(), Some("claude-3-opus-20240229"));
    }

    #[test]
    fn test_summary_top_provider_by_count() {
        let mut aggregator = MetricsAggregator::default();
        aggregator.start_conversation("c1", "anthropic", "a");
        aggregator.start_conversation("c2", "openai", "b");
        aggregator.start_conversation("c3", "openai", "b");

        assert_eq!(aggregator.get_summary().top_provider.as_deref(), Some("openai"));
    }

    #[test]
    fn test_clear_all() {
        let mut aggregator = MetricsAggregator::default();
        aggregator.start_conversation("c1", "openai", "gpt-4");
        aggregator.start_conversation("c2", "openai", "gpt-4");
        aggregator.end_conversation("c1");
        aggregator.clear_all_metrics();

        assert!(aggregator.get_all_metrics().is_empty());
        assert_eq!(aggregator.live_count(), 0);
    }
}
