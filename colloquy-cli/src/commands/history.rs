use anyhow::{bail, Result};
use clap::Subcommand;
use colloquy_core::{HistoryIndexEntry, HistorySearch, Role, SessionMode};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

use super::{parse_optional_datetime, truncate};
use crate::context::CliContext;

#[derive(Subcommand)]
pub enum HistoryCommand {
    #[command(about = "List saved conversations, newest first")]
    List {
        #[arg(short, long, default_value = "20", help = "Maximum rows to show")]
        limit: usize,

        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Search saved conversations")]
    Search {
        #[arg(help = "Text to look for in message content")]
        query: Option<String>,

        #[arg(long, help = "Session mode (single, two_stage)")]
        mode: Option<String>,

        #[arg(short, long, help = "Provider used by any stage")]
        provider: Option<String>,

        #[arg(short, long, help = "Model used by any stage")]
        model: Option<String>,

        #[arg(long, help = "Created on or after (YYYY-MM-DD or RFC 3339)")]
        since: Option<String>,

        #[arg(long, help = "Created on or before (YYYY-MM-DD or RFC 3339)")]
        until: Option<String>,

        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Show one conversation with its messages")]
    Show {
        #[arg(help = "Conversation id")]
        id: String,

        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Delete one conversation")]
    Delete {
        #[arg(help = "Conversation id")]
        id: String,
    },

    #[command(about = "Delete every saved conversation")]
    Clear {
        #[arg(long, help = "Confirm deleting all history")]
        yes: bool,
    },

    #[command(about = "Count conversations and messages per mode")]
    Stats,
}

pub async fn handle_history_command(ctx: &CliContext, cmd: Option<HistoryCommand>) -> Result<()> {
    match cmd.unwrap_or(HistoryCommand::List {
        limit: 20,
        format: "text".to_string(),
    }) {
        HistoryCommand::List { limit, format } => cmd_history_list(ctx, limit, &format).await,
        HistoryCommand::Search {
            query,
            mode,
            provider,
            model,
            since,
            until,
            format,
        } => {
            let mut search = HistorySearch::new().with_date_range(
                parse_optional_datetime(since.as_deref())?,
                parse_optional_datetime(until.as_deref())?,
            );
            if let Some(mode) = mode {
                search = search.with_mode(mode.parse::<SessionMode>().map_err(anyhow::Error::msg)?);
            }
            if let Some(provider) = provider {
                search = search.with_provider(provider);
            }
            if let Some(model) = model {
                search = search.with_model(model);
            }
            if let Some(query) = query {
                search = search.with_query(query);
            }
            cmd_history_search(ctx, &search, &format).await
        }
        HistoryCommand::Show { id, format } => cmd_history_show(ctx, &id, &format).await,
        HistoryCommand::Delete { id } => cmd_history_delete(ctx, &id).await,
        HistoryCommand::Clear { yes } => cmd_history_clear(ctx, yes).await,
        HistoryCommand::Stats => cmd_history_stats(ctx).await,
    }
}

async fn cmd_history_list(ctx: &CliContext, limit: usize, format: &str) -> Result<()> {
    let mut entries = ctx.history()?.list().await?;
    entries.truncate(limit);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("{}", "Conversation History".cyan().bold());
    println!();
    print_entries(&entries);
    Ok(())
}

async fn cmd_history_search(ctx: &CliContext, search: &HistorySearch, format: &str) -> Result<()> {
    let entries = ctx.history()?.search(search).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!(
        "{} {}",
        "Search Results".cyan().bold(),
        format!("({} found)", entries.len()).dimmed()
    );
    println!();
    print_entries(&entries);
    Ok(())
}

fn print_entries(entries: &[HistoryIndexEntry]) {
    if entries.is_empty() {
        println!("{}", "No conversations found.".yellow());
        println!(
            "{}",
            "Run 'colloquy ask' or 'colloquy chat' to start one.".dimmed()
        );
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("ID").fg(Color::White),
            Cell::new("Updated").fg(Color::White),
            Cell::new("Mode").fg(Color::White),
            Cell::new("Models").fg(Color::White),
            Cell::new("Messages").fg(Color::White),
            Cell::new("Preview").fg(Color::White),
        ]);

    for entry in entries {
        table.add_row(vec![
            Cell::new(&entry.id).fg(Color::Cyan),
            Cell::new(entry.updated_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(entry.mode.to_string()),
            Cell::new(entry.models().join(", ")),
            Cell::new(entry.message_count.to_string()),
            Cell::new(truncate(&entry.preview, 48)),
        ]);
    }

    println!("{table}");
}

async fn cmd_history_show(ctx: &CliContext, id: &str, format: &str) -> Result<()> {
    let Some(record) = ctx.history()?.get(id).await? else {
        bail!("No saved conversation with id '{}'", id);
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let index = &record.index;
    println!("{}", "Conversation".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<12} {}", "ID:".bold(), index.id);
    println!("  {:<12} {}", "Mode:".bold(), index.mode);
    println!("  {:<12} {}", "Providers:".bold(), index.providers().join(", "));
    println!("  {:<12} {}", "Models:".bold(), index.models().join(", "));
    println!(
        "  {:<12} {}",
        "Created:".bold(),
        index.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if !index.workspace.is_empty() {
        println!("  {:<12} {}", "Workspace:".bold(), index.workspace);
    }
    println!();

    for message in &record.messages {
        let label = match message.role {
            Role::User => "user".green().bold(),
            Role::Assistant => "assistant".blue().bold(),
            Role::System => "system".dimmed(),
        };
        println!(
            "{} {}",
            label,
            message.timestamp.format("%H:%M:%S").to_string().dimmed()
        );
        println!("{}", message.content);
        println!();
    }

    if let Some(ref trace) = record.trace {
        println!(
            "  {} {} entries over {} turns",
            "Trace:".dimmed(),
            trace.entries.len(),
            trace.total_turns
        );
    }
    Ok(())
}

async fn cmd_history_delete(ctx: &CliContext, id: &str) -> Result<()> {
    if !ctx.history()?.delete_conversation(id).await? {
        bail!("No saved conversation with id '{}'", id);
    }

    println!("{} Deleted conversation {}", "✓".green().bold(), id.cyan());
    Ok(())
}

async fn cmd_history_clear(ctx: &CliContext, yes: bool) -> Result<()> {
    if !yes {
        println!(
            "{} This deletes every saved conversation. Re-run with --yes to confirm.",
            "!".yellow()
        );
        return Ok(());
    }

    let removed = ctx.history()?.clear_all().await?;
    println!(
        "{} Removed {} conversation(s)",
        "✓".green().bold(),
        removed
    );
    Ok(())
}

async fn cmd_history_stats(ctx: &CliContext) -> Result<()> {
    let history = ctx.history()?;
    let stats = history.stats().await?;

    println!("{}", "History Statistics".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<16} {}", "Conversations:".bold(), stats.total_conversations);
    println!("  {:<16} {}", "Messages:".bold(), stats.total_messages);
    println!("  {:<16} {}", "Single-stage:".bold(), stats.single_stage);
    println!("  {:<16} {}", "Two-stage:".bold(), stats.two_stage);
    println!("  {:<16} {}", "Location:".bold(), history.location().dimmed());
    Ok(())
}
