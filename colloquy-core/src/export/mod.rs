//! CSV and JSON renderings of metrics and trace entries.

mod csv;
mod json;

pub use self::csv::{CsvExporter, METRICS_COLUMNS, TRACE_COLUMNS};
pub use self::json::JsonExporter;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ColloquyError, ColloquyResult};
use crate::models::{ConversationMetrics, TraceEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!(
                "Unknown export format '{}'. Must be one of: csv, json",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub include_headers: bool,
    pub pretty: bool,
    /// strftime pattern for CSV dates; RFC 3339 when unset.
    pub date_format: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_headers: true,
            pretty: false,
            date_format: None,
        }
    }
}

impl ExportOptions {
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    pub fn without_headers(mut self) -> Self {
        self.include_headers = false;
        self
    }

    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }

    /// Reject a `date_format` that chrono cannot render.
    pub fn validate(&self) -> ColloquyResult<()> {
        let Some(ref format) = self.date_format else {
            return Ok(());
        };

        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(ColloquyError::validation(format!(
                "Invalid date format '{}'",
                format
            )));
        }
        Ok(())
    }

    pub(crate) fn format_datetime(&self, dt: &DateTime<Utc>) -> String {
        match self.date_format {
            Some(ref format) => dt.format(format).to_string(),
            None => dt.to_rfc3339(),
        }
    }
}

pub trait Exporter: Send + Sync {
    fn format(&self) -> ExportFormat;

    fn file_extension(&self) -> &'static str;

    fn export_metrics(
        &self,
        metrics: &[ConversationMetrics],
        options: &ExportOptions,
    ) -> ColloquyResult<String>;

    fn export_traces(&self, entries: &[TraceEntry], options: &ExportOptions)
        -> ColloquyResult<String>;
}

pub fn create_exporter(format: ExportFormat) -> Box<dyn Exporter> {
    match format {
        ExportFormat::Csv => Box::new(CsvExporter::new()),
        ExportFormat::Json => Box::new(JsonExporter::new()),
    }
}
