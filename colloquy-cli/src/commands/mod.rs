pub mod ask;
pub mod config;
pub mod history;
pub mod metrics;
pub mod traces;

pub use ask::{handle_ask_command, handle_chat_command, AskArgs, SessionOverrides};
pub use config::{handle_config_command, ConfigCommand};
pub use history::{handle_history_command, HistoryCommand};
pub use metrics::{handle_metrics_command, MetricsCommand};
pub use traces::{handle_traces_command, TracesCommand};

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use colloquy_core::ExportFormat;
use colored::Colorize;

pub(crate) fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.2}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}

pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_len {
        flat
    } else {
        let cut: String = flat.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

pub(crate) fn parse_export_format(format: &str) -> Result<ExportFormat> {
    format.parse::<ExportFormat>().map_err(anyhow::Error::msg)
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub(crate) fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD or RFC 3339", value))?;
    match date.and_hms_opt(0, 0, 0) {
        Some(naive) => Ok(naive.and_utc()),
        None => bail!("Invalid date '{}'", value),
    }
}

pub(crate) fn parse_optional_datetime(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(parse_datetime).transpose()
}

/// Print to stdout, or write to `output` and say so on stderr.
pub(crate) fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{} Wrote {}",
                "✓".green().bold(),
                path.display().to_string().cyan()
            );
        }
        None => println!("{}", content),
    }
    Ok(())
}
