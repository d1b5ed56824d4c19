use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use colloquy_core::{create_exporter, metrics::summarize, ConversationMetrics, ExportOptions};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

use super::{format_tokens, parse_export_format, write_output};
use crate::context::CliContext;

#[derive(Subcommand)]
pub enum MetricsCommand {
    #[command(about = "Totals across all recorded conversations")]
    Summary {
        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Per-conversation usage")]
    List {
        #[arg(short, long, help = "Only conversations using this provider")]
        provider: Option<String>,

        #[arg(short, long, default_value = "20", help = "Maximum rows to show")]
        limit: usize,
    },

    #[command(about = "Export per-conversation metrics")]
    Export {
        #[arg(short, long, default_value = "csv", help = "Export format (csv, json)")]
        format: String,

        #[arg(short, long, help = "Write to this file instead of stdout")]
        output: Option<PathBuf>,

        #[arg(long, help = "Pretty-print JSON output")]
        pretty: bool,

        #[arg(long, help = "Omit the CSV header row")]
        no_headers: bool,

        #[arg(long, help = "strftime pattern for CSV dates")]
        date_format: Option<String>,
    },
}

pub async fn handle_metrics_command(ctx: &CliContext, cmd: Option<MetricsCommand>) -> Result<()> {
    match cmd.unwrap_or(MetricsCommand::Summary {
        format: "text".to_string(),
    }) {
        MetricsCommand::Summary { format } => cmd_metrics_summary(ctx, &format).await,
        MetricsCommand::List { provider, limit } => {
            cmd_metrics_list(ctx, provider.as_deref(), limit).await
        }
        MetricsCommand::Export {
            format,
            output,
            pretty,
            no_headers,
            date_format,
        } => {
            let mut options = ExportOptions::default();
            if pretty {
                options = options.pretty();
            }
            if no_headers {
                options = options.without_headers();
            }
            if let Some(date_format) = date_format {
                options = options.with_date_format(date_format);
            }
            cmd_metrics_export(ctx, &format, &options, output).await
        }
    }
}

async fn cmd_metrics_summary(ctx: &CliContext, format: &str) -> Result<()> {
    let records = ctx.load_metrics().await?;
    let summary = summarize(&records);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", "Usage Summary".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());

    if records.is_empty() {
        println!("{}", "No metrics recorded yet.".yellow());
        return Ok(());
    }

    println!("  {:<22} {}", "Conversations:".bold(), summary.total_conversations);
    println!("  {:<22} {}", "Messages:".bold(), summary.total_messages);
    println!(
        "  {:<22} {}",
        "Tokens:".bold(),
        format_tokens(summary.total_tokens)
    );
    println!(
        "  {:<22} {}",
        "Total Cost:".bold(),
        format!("${:.4}", summary.total_cost).yellow()
    );
    println!(
        "  {:<22} ${:.4}",
        "Avg Cost/Conversation:".bold(),
        summary.average_cost_per_conversation()
    );
    println!(
        "  {:<22} {:.0} ms",
        "Avg Response Time:".bold(),
        summary.average_response_time
    );
    if let Some(ref provider) = summary.top_provider {
        println!("  {:<22} {}", "Top Provider:".bold(), provider.cyan());
    }
    if let Some(ref model) = summary.top_model {
        println!("  {:<22} {}", "Top Model:".bold(), model.cyan());
    }
    Ok(())
}

async fn cmd_metrics_list(ctx: &CliContext, provider: Option<&str>, limit: usize) -> Result<()> {
    let mut records: Vec<ConversationMetrics> = ctx
        .load_metrics()
        .await?
        .into_iter()
        .filter(|m| provider.map_or(true, |p| m.provider == p))
        .collect();
    records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    records.truncate(limit);

    if records.is_empty() {
        println!("{}", "No metrics recorded yet.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Conversation").fg(Color::White),
            Cell::new("Provider").fg(Color::White),
            Cell::new("Model").fg(Color::White),
            Cell::new("Messages").fg(Color::White),
            Cell::new("Tokens").fg(Color::White),
            Cell::new("Avg ms").fg(Color::White),
            Cell::new("Cost").fg(Color::White),
        ]);

    for record in &records {
        table.add_row(vec![
            Cell::new(&record.conversation_id).fg(Color::Cyan),
            Cell::new(&record.provider),
            Cell::new(&record.model),
            Cell::new(record.message_count.to_string()),
            Cell::new(format_tokens(record.total_tokens)),
            Cell::new(format!("{:.0}", record.average_response_time)),
            Cell::new(format!("${:.4}", record.total_cost)).fg(Color::Yellow),
        ]);
    }

    println!("{table}");
    Ok(())
}

async fn cmd_metrics_export(
    ctx: &CliContext,
    format: &str,
    options: &ExportOptions,
    output: Option<PathBuf>,
) -> Result<()> {
    let exporter = create_exporter(parse_export_format(format)?);
    let records = ctx.load_metrics().await?;
    let content = exporter.export_metrics(&records, options)?;
    write_output(&content, output.as_deref())
}
