use serde::Serialize;

use super::{ExportFormat, ExportOptions, Exporter};
use crate::error::ColloquyResult;
use crate::models::{ConversationMetrics, TraceEntry};

const DEFAULT_INDENT: usize = 2;

/// Writes records as one JSON array. Dates are always RFC 3339 so the output
/// parses back into the same records.
#[derive(Debug, Clone)]
pub struct JsonExporter {
    indent_size: usize,
}

impl Default for JsonExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonExporter {
    pub fn new() -> Self {
        Self {
            indent_size: DEFAULT_INDENT,
        }
    }

    pub fn with_indent(mut self, indent_size: usize) -> Self {
        self.indent_size = indent_size;
        self
    }

    fn serialize<T: Serialize>(&self, data: &T, options: &ExportOptions) -> ColloquyResult<String> {
        if !options.pretty {
            return Ok(serde_json::to_string(data)?);
        }

        let indent = " ".repeat(self.indent_size).into_bytes();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
        let mut writer = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
        data.serialize(&mut serializer)?;

        String::from_utf8(writer)
            .map_err(|e| crate::error::ColloquyError::SerializationError(e.to_string()))
    }
}

impl Exporter for JsonExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn export_metrics(
        &self,
        metrics: &[ConversationMetrics],
        options: &ExportOptions,
    ) -> ColloquyResult<String> {
        self.serialize(&metrics, options)
    }

    fn export_traces(
        &self,
        entries: &[TraceEntry],
        options: &ExportOptions,
    ) -> ColloquyResult<String> {
        self.serialize(&entries, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> Vec<ConversationMetrics> {
        let mut first = ConversationMetrics::new("c1", "openai", "gpt-4");
        first.add_usage(1000, 2000, 1500.0, 0.15);
        first.end_time = Some(Utc::now());
        let second = ConversationMetrics::new("c2", "anthropic", "claude-3-opus-20240229");
        vec![first, second]
    }

    #[test]
    fn test_metrics_json_parses_back() {
        let records = sample();
        let output = JsonExporter::new()
            .export_metrics(&records, &ExportOptions::default())
            .unwrap();

        let parsed: Vec<ConversationMetrics> = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed, records);
    }

    #[test]
    fn test_dates_are_iso_formatted() {
        let output = JsonExporter::new()
            .export_metrics(&sample(), &ExportOptions::default())
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        let start = value[0]["start_time"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(start).is_ok());
        assert!(value[1]["end_time"].is_null());
    }

    #[test]
    fn test_pretty_output_uses_indent() {
        let output = JsonExporter::new()
            .with_indent(4)
            .export_metrics(&sample(), &ExportOptions::default().pretty())
            .unwrap();
        assert!(output.contains("\n        \"conversation_id\""));

        let empty = JsonExporter::new()
            .export_traces(&[], &ExportOptions::default())
            .unwrap();
        assert_eq!(empty, "[]");
    }
}
