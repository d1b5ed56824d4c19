use anyhow::Result;
use clap::Args;
use colloquy_core::{
    ColloquyConfig, ColloquyError, CombinedResult, Session, SessionConfig, SessionCoordinator,
};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::context::CliContext;

/// Per-invocation replacements for the configured session settings.
#[derive(Args, Debug, Clone, Default)]
pub struct SessionOverrides {
    #[arg(long, help = "Session mode (single, two_stage)")]
    pub mode: Option<String>,

    #[arg(short, long, help = "Provider for single-stage sessions")]
    pub provider: Option<String>,

    #[arg(short, long, help = "Model for single-stage sessions")]
    pub model: Option<String>,

    #[arg(long, help = "Model used by the plan stage")]
    pub plan_model: Option<String>,

    #[arg(long, help = "Model used by the act stage")]
    pub act_model: Option<String>,

    #[arg(long, help = "Maximum number of turns")]
    pub max_turns: Option<i64>,
}

impl SessionOverrides {
    fn apply(&self, config: &ColloquyConfig) -> Result<SessionConfig> {
        let mut config = config.clone();
        if let Some(ref mode) = self.mode {
            config.mode = mode.clone();
        }
        if let Some(ref provider) = self.provider {
            config.provider = provider.clone();
        }
        if let Some(ref model) = self.model {
            config.model = model.clone();
        }
        if let Some(ref model) = self.plan_model {
            config.plan.model = Some(model.clone());
        }
        if let Some(ref model) = self.act_model {
            config.act.model = Some(model.clone());
        }
        if let Some(max_turns) = self.max_turns {
            config.max_turns = max_turns;
        }
        Ok(config.session_config()?)
    }
}

#[derive(Args, Debug)]
pub struct AskArgs {
    #[arg(help = "The question or task")]
    pub prompt: String,

    #[arg(
        long,
        help = "Run through the orchestration state machine with fallback"
    )]
    pub orchestrate: bool,

    #[arg(
        short,
        long,
        default_value = "text",
        help = "Output format (text, json)"
    )]
    pub format: String,

    #[command(flatten)]
    pub overrides: SessionOverrides,
}

pub async fn handle_ask_command(ctx: &CliContext, args: AskArgs) -> Result<()> {
    let session_config = args.overrides.apply(&ctx.config)?;
    let coordinator = ctx.coordinator().await?;
    let mut session = coordinator.open_session(session_config).await?;

    let outcome = if args.orchestrate {
        coordinator
            .orchestrate(&mut session, &args.prompt)
            .await
            .map(Outcome::Orchestrated)
    } else {
        coordinator
            .submit_turn(&mut session, &args.prompt)
            .await
            .map(Outcome::Direct)
    };

    coordinator.close_session(&mut session).await;
    let outcome = outcome?;

    if args.format == "json" {
        let value = match outcome {
            Outcome::Direct(output) => serde_json::json!({
                "conversation_id": session.id(),
                "output": output,
            }),
            Outcome::Orchestrated(result) => serde_json::json!({
                "conversation_id": session.id(),
                "result": result,
            }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match outcome {
        Outcome::Direct(output) => println!("{}", output),
        Outcome::Orchestrated(result) => print_orchestrated(&result),
    }
    eprintln!(
        "{}",
        format!("conversation {}", session.id()).dimmed()
    );
    Ok(())
}

enum Outcome {
    Direct(String),
    Orchestrated(CombinedResult),
}

fn print_orchestrated(result: &CombinedResult) {
    println!("{}", result.output);
    println!();

    let states: Vec<String> = result
        .state_history
        .iter()
        .map(|change| change.to.to_string())
        .collect();
    eprintln!("  {} {}", "States:".dimmed(), states.join(" → ").dimmed());

    if result.fallback {
        eprintln!(
            "  {} {}",
            "!".yellow(),
            "Answered by the fallback path".yellow()
        );
        if let Some(ref error) = result.error {
            eprintln!("    {}", error.dimmed());
        }
    }
}

pub async fn handle_chat_command(
    ctx: &CliContext,
    resume: Option<String>,
    overrides: SessionOverrides,
) -> Result<()> {
    let session_config = overrides.apply(&ctx.config)?;
    let coordinator = ctx.coordinator().await?;

    let mut session = match resume {
        Some(id) => coordinator.open_session_with_id(id, session_config).await?,
        None => coordinator.open_session(session_config).await?,
    };

    print_chat_banner(&session);

    let result = chat_loop(&coordinator, &mut session).await;

    if let Some(entry) = coordinator.close_session(&mut session).await {
        println!(
            "{} Saved conversation {} ({} messages)",
            "✓".green().bold(),
            entry.id.cyan(),
            entry.message_count
        );
    }
    result
}

fn print_chat_banner(session: &Session) {
    let (provider, model) = session.conversation().binding.label();
    println!("{}", "Colloquy Chat".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<14} {}", "Conversation:".bold(), session.id());
    println!("  {:<14} {}", "Mode:".bold(), session.mode());
    println!("  {:<14} {} / {}", "Model:".bold(), provider, model);
    if !session.messages().is_empty() {
        println!(
            "  {:<14} {} earlier messages",
            "Resumed:".bold(),
            session.messages().len()
        );
    }
    println!();
    println!(
        "{}",
        "Type a message, /exit to quit. Ctrl-C cancels the running turn.".dimmed()
    );
    println!();
}

async fn chat_loop(coordinator: &SessionCoordinator, session: &mut Session) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("{} ", ">".green().bold());
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "/exit" | "/quit") {
            break;
        }

        let turn = coordinator.submit_turn(session, input);
        tokio::pin!(turn);

        let result = tokio::select! {
            result = &mut turn => result,
            _ = tokio::signal::ctrl_c() => {
                coordinator.cancel();
                eprintln!("{}", "Cancelling after the current stage...".yellow());
                turn.await
            }
        };

        match result {
            Ok(output) => {
                println!("{}", output);
                println!();
            }
            Err(ColloquyError::ValidationError(message)) => {
                eprintln!("{} {}", "!".yellow(), message);
                break;
            }
            Err(e) => {
                debug!(error_code = e.error_code(), "Turn failed");
                eprintln!("{}: {}", "Error".red().bold(), e);
                if let Some(suggestion) = e.user_suggestion() {
                    eprintln!("  {}", suggestion.dimmed());
                }
            }
        }
    }

    Ok(())
}
