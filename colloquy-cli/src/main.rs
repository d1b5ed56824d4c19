use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colloquy_core::{CliErrorDisplay, ColloquyConfig, ColloquyError};
use colored::Colorize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod context;

use commands::{
    handle_ask_command, handle_chat_command, handle_config_command, handle_history_command,
    handle_metrics_command, handle_traces_command, AskArgs, ConfigCommand, HistoryCommand,
    MetricsCommand, SessionOverrides, TracesCommand,
};
use context::CliContext;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Parser)]
#[command(name = "colloquy")]
#[command(version = VERSION)]
#[command(about = "Colloquy - staged LLM conversations with usage, trace and history reporting")]
#[command(long_about = r#"
Colloquy drives conversations with LLM providers, either with one model
answering directly or with a planning model feeding an implementation model.
Every turn is accounted for (tokens, cost, latency), traced stage by stage and
saved to a searchable history.

Use 'colloquy ask' for a single question, 'colloquy chat' for an interactive
session, and 'colloquy metrics' / 'colloquy traces' to inspect what happened.
The 'mock' provider answers locally and needs no network access.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[arg(
        short,
        long,
        global = true,
        help = "Workspace root; state is kept in <workspace>/.colloquy"
    )]
    workspace: Option<PathBuf>,

    #[arg(long, global = true, help = "Read settings from this file only")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Ask one question and print the answer")]
    Ask(AskArgs),

    #[command(about = "Start an interactive conversation")]
    Chat {
        #[arg(long, help = "Resume the saved conversation with this id")]
        resume: Option<String>,

        #[command(flatten)]
        overrides: SessionOverrides,
    },

    #[command(about = "Browse and manage saved conversations")]
    History {
        #[command(subcommand)]
        action: Option<HistoryCommand>,
    },

    #[command(about = "Show and export token and cost metrics")]
    Metrics {
        #[command(subcommand)]
        action: Option<MetricsCommand>,
    },

    #[command(about = "Show, filter and export execution traces")]
    Traces {
        #[command(subcommand)]
        action: Option<TracesCommand>,
    },

    #[command(about = "Inspect the effective configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommand>,
    },

    #[command(about = "Show version information")]
    Version {
        #[arg(short, long)]
        detailed: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Version { detailed } = cli.command {
        cmd_version(detailed);
        return ExitCode::SUCCESS;
    }

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), CliErrorDisplay::new(&e));
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config, cli.verbose);

    match run(cli, config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ColloquyError>() {
                Some(err) => eprintln!("{}: {}", "Error".red().bold(), CliErrorDisplay::new(err)),
                None => eprintln!("{}: {:#}", "Error".red().bold(), e),
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ColloquyConfig, ColloquyError> {
    match path {
        Some(path) if !path.exists() => Err(ColloquyError::ConfigParseError(format!(
            "Config file not found: {}",
            path.display()
        ))),
        Some(path) => ColloquyConfig::load_from_paths(vec![path.clone()]),
        None => ColloquyConfig::load(),
    }
}

/// `RUST_LOG` wins, then `--verbose`, then the configured level.
fn init_logging(config: &ColloquyConfig, verbose: bool) {
    let fallback = if verbose { "debug" } else { config.log_level() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json_format {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli, config: ColloquyConfig) -> anyhow::Result<()> {
    let ctx = CliContext::new(config, cli.workspace);

    match cli.command {
        Commands::Ask(args) => handle_ask_command(&ctx, args).await,
        Commands::Chat { resume, overrides } => handle_chat_command(&ctx, resume, overrides).await,
        Commands::History { action } => handle_history_command(&ctx, action).await,
        Commands::Metrics { action } => handle_metrics_command(&ctx, action).await,
        Commands::Traces { action } => handle_traces_command(&ctx, action).await,
        Commands::Config { action } => handle_config_command(&ctx, action),
        Commands::Version { detailed } => {
            cmd_version(detailed);
            Ok(())
        }
    }
}

fn cmd_version(detailed: bool) {
    if detailed {
        println!("{}", "Colloquy Version Information".cyan().bold());
        println!("{}", "═".repeat(40).dimmed());
        println!("  {:<15} {}", "Version:".bold(), VERSION);
        println!("  {:<15} {}", "Name:".bold(), NAME);
        println!("  {:<15} Apache-2.0", "License:".bold());
        println!();
        println!("  {}", "Providers:".bold());
        println!("    openai       chat completions");
        println!("    anthropic    messages");
        println!("    openrouter   chat completions");
        println!("    ollama       chat completions");
        println!("    mock         local echo, no network");
        println!();
        println!("  {}", "Build Information:".bold());
        println!("    Rust Edition: 2021");
        #[cfg(debug_assertions)]
        println!("    Build:        Debug");
        #[cfg(not(debug_assertions))]
        println!("    Build:        Release");
    } else {
        println!("colloquy {}", VERSION);
    }
}
