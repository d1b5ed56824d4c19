use super::{ExportFormat, ExportOptions, Exporter};
use crate::error::ColloquyResult;
use crate::models::{ConversationMetrics, TraceEntry};

pub const METRICS_COLUMNS: [&str; 11] = [
    "conversation_id",
    "provider",
    "model",
    "prompt_tokens",
    "completion_tokens",
    "total_tokens",
    "total_cost",
    "message_count",
    "average_response_time",
    "start_time",
    "end_time",
];

pub const TRACE_COLUMNS: [&str; 11] = [
    "conversation_id",
    "entry_id",
    "timestamp",
    "stage",
    "turn",
    "duration_ms",
    "tool_count",
    "has_error",
    "error_message",
    "input",
    "output",
];

const DELIMITER: char = ',';
const QUOTE: char = '"';

/// Rows are joined with `\n` and the output has no trailing newline.
#[derive(Debug, Clone, Default)]
pub struct CsvExporter;

impl CsvExporter {
    pub fn new() -> Self {
        Self
    }

    fn escape_field(field: &str) -> String {
        let needs_quoting = field.contains(DELIMITER)
            || field.contains(QUOTE)
            || field.contains('\n')
            || field.contains('\r');

        if needs_quoting {
            let escaped = field.replace(QUOTE, "\"\"");
            format!("{}{}{}", QUOTE, escaped, QUOTE)
        } else {
            field.to_string()
        }
    }

    fn render(headers: &[&str], rows: Vec<Vec<String>>, options: &ExportOptions) -> String {
        let mut lines = Vec::with_capacity(rows.len() + 1);
        if options.include_headers {
            lines.push(headers.join(","));
        }

        for row in rows {
            lines.push(
                row.iter()
                    .map(|f| Self::escape_field(f))
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }

        lines.join("\n")
    }
}

impl Exporter for CsvExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn file_extension(&self) -> &'static str {
        "csv"
    }

    fn export_metrics(
        &self,
        metrics: &[ConversationMetrics],
        options: &ExportOptions,
    ) -> ColloquyResult<String> {
        options.validate()?;
        let rows = metrics
            .iter()
            .map(|m| {
                vec![
                    m.conversation_id.clone(),
                    m.provider.clone(),
                    m.model.clone(),
                    m.prompt_tokens.to_string(),
                    m.completion_tokens.to_string(),
                    m.total_tokens.to_string(),
                    m.total_cost.to_string(),
                    m.message_count.to_string(),
                    m.average_response_time.to_string(),
                    options.format_datetime(&m.start_time),
                    m.end_time
                        .map(|t| options.format_datetime(&t))
                        .unwrap_or_default(),
                ]
            })
            .collect();

        Ok(Self::render(&METRICS_COLUMNS, rows, options))
    }

    fn export_traces(
        &self,
        entries: &[TraceEntry],
        options: &ExportOptions,
    ) -> ColloquyResult<String> {
        options.validate()?;
        let rows = entries
            .iter()
            .map(|e| {
                vec![
                    e.conversation_id.clone(),
                    e.id.clone(),
                    options.format_datetime(&e.timestamp),
                    e.stage.to_string(),
                    e.turn.to_string(),
                    e.duration_ms.to_string(),
                    e.tools.len().to_string(),
                    e.has_error().to_string(),
                    e.error
                        .as_ref()
                        .map(|err| err.message.clone())
                        .unwrap_or_default(),
                    e.input.clone().unwrap_or_default(),
                    e.output.clone().unwrap_or_default(),
                ]
            })
            .collect();

        Ok(Self::render(&TRACE_COLUMNS, rows, options))
    }
}
