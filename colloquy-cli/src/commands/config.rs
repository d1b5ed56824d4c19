use anyhow::Result;
use clap::Subcommand;
use colloquy_core::{get_config_dir, StageConfig, StageMode};
use colored::Colorize;

use crate::context::CliContext;

#[derive(Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Print the effective configuration")]
    Show {
        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Check the configuration and resolve the session stages")]
    Validate,

    #[command(about = "Print where configuration and state are read from")]
    Paths,
}

pub fn handle_config_command(ctx: &CliContext, cmd: Option<ConfigCommand>) -> Result<()> {
    match cmd.unwrap_or(ConfigCommand::Show {
        format: "text".to_string(),
    }) {
        ConfigCommand::Show { format } => cmd_config_show(ctx, &format),
        ConfigCommand::Validate => cmd_config_validate(ctx),
        ConfigCommand::Paths => cmd_config_paths(ctx),
    }
}

fn cmd_config_show(ctx: &CliContext, format: &str) -> Result<()> {
    let config = &ctx.config;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("{}", "Colloquy Configuration".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<18} {}", "Mode:".bold(), config.mode);
    println!("  {:<18} {}", "Provider:".bold(), config.provider);
    println!("  {:<18} {}", "Model:".bold(), config.model);
    if let Some(ref url) = config.base_url {
        println!("  {:<18} {}", "Base URL:".bold(), url);
    }
    println!(
        "  {:<18} {}",
        "API Key:".bold(),
        if config.api_key.is_some() {
            "set".green()
        } else {
            "not set".dimmed()
        }
    );
    println!("  {:<18} {}", "Max Turns:".bold(), config.max_turns);
    println!("  {:<18} {}s", "Timeout:".bold(), config.timeout_seconds);
    println!("  {:<18} {}", "Temperature:".bold(), config.temperature);
    println!("  {:<18} {}", "Debug Mode:".bold(), config.debug_mode);
    println!("  {:<18} {}", "Log Level:".bold(), config.log_level());
    println!(
        "  {:<18} {}",
        "Fallback:".bold(),
        config.orchestration.fallback_enabled
    );
    println!(
        "  {:<18} {} entries per trace, {} persisted",
        "Telemetry:".bold(),
        config.telemetry.max_trace_entries,
        config.telemetry.max_persisted_traces
    );
    Ok(())
}

fn cmd_config_validate(ctx: &CliContext) -> Result<()> {
    let session = ctx.config.session_config()?;

    println!("{} Configuration is valid", "✓".green().bold());
    println!();
    match session.stages {
        StageMode::Single(ref stage) => print_stage("Single", stage),
        StageMode::TwoStage { ref plan, ref act } => {
            print_stage("Plan", plan);
            print_stage("Act", act);
        }
    }
    println!("  {:<8} {}", "Turns:".bold(), session.max_turns);
    Ok(())
}

fn print_stage(label: &str, stage: &StageConfig) {
    println!(
        "  {:<8} {} / {} ({}s, temperature {}{})",
        format!("{}:", label).bold(),
        stage.provider.cyan(),
        stage.model,
        stage.timeout_seconds,
        stage.temperature,
        if stage.api_key.is_some() { ", key set" } else { "" }
    );
}

fn cmd_config_paths(ctx: &CliContext) -> Result<()> {
    println!("{}", "Colloquy Paths".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());

    match get_config_dir() {
        Some(dir) => println!("  {:<10} {}", "Config:".bold(), dir.join("config.toml").display()),
        None => println!("  {:<10} {}", "Config:".bold(), "unavailable".dimmed()),
    }
    println!("  {:<10} {}", "Storage:".bold(), ctx.storage_root()?.display());
    Ok(())
}
