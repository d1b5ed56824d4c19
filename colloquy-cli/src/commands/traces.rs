use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use colloquy_core::{
    create_exporter, traces::summarize, ConversationTrace, ExportOptions, Stage, TraceEntry,
    TraceFilter,
};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

use super::{parse_export_format, parse_optional_datetime, truncate, write_output};
use crate::context::CliContext;

#[derive(Subcommand)]
pub enum TracesCommand {
    #[command(about = "Totals across all persisted traces")]
    Summary {
        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "List trace entries matching every given criterion")]
    Filter {
        #[command(flatten)]
        criteria: FilterArgs,

        #[arg(short, long, default_value = "50", help = "Maximum rows to show")]
        limit: usize,

        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Export trace entries")]
    Export {
        #[command(flatten)]
        criteria: FilterArgs,

        #[arg(short, long, default_value = "csv", help = "Export format (csv, json)")]
        format: String,

        #[arg(short, long, help = "Write to this file instead of stdout")]
        output: Option<PathBuf>,

        #[arg(long, help = "Pretty-print JSON output")]
        pretty: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    #[arg(short, long, help = "Conversation id")]
    pub conversation: Option<String>,

    #[arg(short, long, help = "Stage (observe, plan, act, verify)")]
    pub stage: Option<String>,

    #[arg(long, help = "Lowest turn number")]
    pub min_turn: Option<u32>,

    #[arg(long, help = "Highest turn number")]
    pub max_turn: Option<u32>,

    #[arg(long, help = "Recorded on or after (YYYY-MM-DD or RFC 3339)")]
    pub since: Option<String>,

    #[arg(long, help = "Recorded on or before (YYYY-MM-DD or RFC 3339)")]
    pub until: Option<String>,

    #[arg(long, help = "Only entries carrying an error")]
    pub errors: bool,

    #[arg(long, help = "Only entries with tool executions")]
    pub tools: bool,
}

impl FilterArgs {
    fn to_filter(&self) -> Result<TraceFilter> {
        let mut filter = TraceFilter::new()
            .with_turn_range(self.min_turn, self.max_turn)
            .with_time_range(
                parse_optional_datetime(self.since.as_deref())?,
                parse_optional_datetime(self.until.as_deref())?,
            );

        if let Some(ref id) = self.conversation {
            filter = filter.with_conversation(id.clone());
        }
        if let Some(ref stage) = self.stage {
            filter = filter.with_stage(stage.parse::<Stage>().map_err(anyhow::Error::msg)?);
        }
        if self.errors {
            filter = filter.with_errors(true);
        }
        if self.tools {
            filter = filter.with_tools(true);
        }
        Ok(filter)
    }
}

fn matching_entries(traces: &[ConversationTrace], filter: &TraceFilter) -> Vec<TraceEntry> {
    traces
        .iter()
        .flat_map(|trace| trace.entries.iter())
        .filter(|entry| filter.matches(entry))
        .cloned()
        .collect()
}

pub async fn handle_traces_command(ctx: &CliContext, cmd: Option<TracesCommand>) -> Result<()> {
    match cmd.unwrap_or(TracesCommand::Summary {
        format: "text".to_string(),
    }) {
        TracesCommand::Summary { format } => cmd_traces_summary(ctx, &format).await,
        TracesCommand::Filter {
            criteria,
            limit,
            format,
        } => cmd_traces_filter(ctx, &criteria.to_filter()?, limit, &format).await,
        TracesCommand::Export {
            criteria,
            format,
            output,
            pretty,
        } => {
            let mut options = ExportOptions::default();
            if pretty {
                options = options.pretty();
            }
            cmd_traces_export(ctx, &criteria.to_filter()?, &format, &options, output).await
        }
    }
}

async fn cmd_traces_summary(ctx: &CliContext, format: &str) -> Result<()> {
    let traces = ctx.load_traces().await?;
    let summary = summarize(&traces);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", "Trace Summary".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());

    if traces.is_empty() {
        println!("{}", "No traces persisted yet.".yellow());
        return Ok(());
    }

    println!("  {:<20} {}", "Traces:".bold(), summary.total_traces);
    println!("  {:<20} {}", "Turns:".bold(), summary.total_turns);
    println!("  {:<20} {}", "Entries:".bold(), summary.total_entries);
    println!(
        "  {:<20} {:.1} ms",
        "Avg Entry Duration:".bold(),
        summary.average_duration_ms
    );
    if let Some(stage) = summary.most_common_stage {
        println!("  {:<20} {}", "Most Common Stage:".bold(), stage);
    }
    println!("  {:<20} {}", "Tool Executions:".bold(), summary.total_tool_executions);

    let errors = if summary.error_count > 0 {
        summary.error_count.to_string().red()
    } else {
        summary.error_count.to_string().green()
    };
    println!("  {:<20} {}", "Errors:".bold(), errors);
    println!("  {:<20} {:.1}%", "Success Rate:".bold(), summary.success_rate);
    Ok(())
}

async fn cmd_traces_filter(
    ctx: &CliContext,
    filter: &TraceFilter,
    limit: usize,
    format: &str,
) -> Result<()> {
    let traces = ctx.load_traces().await?;
    let mut entries = matching_entries(&traces, filter);
    entries.truncate(limit);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("{}", "No trace entries match.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Conversation").fg(Color::White),
            Cell::new("Turn").fg(Color::White),
            Cell::new("Stage").fg(Color::White),
            Cell::new("ms").fg(Color::White),
            Cell::new("Tools").fg(Color::White),
            Cell::new("Detail").fg(Color::White),
        ]);

    for entry in &entries {
        let (detail, color) = match entry.error {
            Some(ref error) => (truncate(&error.message, 60), Color::Red),
            None => (
                truncate(entry.output.as_deref().unwrap_or(""), 60),
                Color::Reset,
            ),
        };
        table.add_row(vec![
            Cell::new(truncate(&entry.conversation_id, 12)).fg(Color::Cyan),
            Cell::new(entry.turn.to_string()),
            Cell::new(entry.stage.to_string()),
            Cell::new(entry.duration_ms.to_string()),
            Cell::new(entry.tools.len().to_string()),
            Cell::new(detail).fg(color),
        ]);
    }

    println!("{table}");
    Ok(())
}

async fn cmd_traces_export(
    ctx: &CliContext,
    filter: &TraceFilter,
    format: &str,
    options: &ExportOptions,
    output: Option<PathBuf>,
) -> Result<()> {
    let exporter = create_exporter(parse_export_format(format)?);
    let traces = ctx.load_traces().await?;
    let entries = matching_entries(&traces, filter);
    let content = exporter.export_traces(&entries, options)?;
    write_output(&content, output.as_deref())
}
