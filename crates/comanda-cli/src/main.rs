//! comanda - console front end for the pizzeria ordering assistant
//!
//! Each stdin line is an inbound message. Prefix it with `user_id:` to
//! talk as several customers at once; bare lines come from `console`.

mod config;
mod console;
mod store;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use comanda_agent::{
    DebounceScheduler, Disposition, MemoryLog, Pipeline, ProviderService, TurnEvent,
};
use comanda_ai::{Model, OpenAiCompatible};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const CONSOLE_USER: &str = "console";

/// comanda - pizzeria ordering assistant
#[derive(Parser, Debug)]
#[command(name = "comanda")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: ~/.config/comanda/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model to use (default: gpt-4o-mini)
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long)]
    base_url: Option<String>,

    /// Quiet period before buffered messages become a turn
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// Split `user: text` into its parts; lines without a prefix belong to the console user
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.split_once(':') {
        Some((user, text)) if !user.trim().is_empty() && !user.contains(char::is_whitespace) => {
            let text = text.trim();
            (!text.is_empty()).then_some((user.trim(), text))
        }
        _ => Some((CONSOLE_USER, line)),
    }
}

fn describe_event(event: &TurnEvent) -> Option<String> {
    match event {
        TurnEvent::FragmentsSplit { fragments, .. } => Some(format!(
            "[{} fragment(s): {}]",
            fragments.len(),
            fragments
                .iter()
                .map(|f| f.intent.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )),
        TurnEvent::ToolExecutionStart { tool_name, .. } => Some(format!("[Running {}...]", tool_name)),
        TurnEvent::ToolExecutionEnd {
            tool_name,
            result,
            is_error: true,
            ..
        } => Some(format!("[{} failed: {}]", tool_name, result)),
        TurnEvent::TurnCancelled { .. } => Some("[Turn superseded by new messages]".to_string()),
        TurnEvent::TurnFailed { message, .. } => Some(format!("[Turn failed: {}]", message)),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    let filter = if args.verbose {
        EnvFilter::new("comanda=debug,comanda_agent=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("comanda=info,comanda_agent=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = config::Config::config_path(args.config.as_deref());

    // Initialize config and exit
    if args.init_config {
        match config::Config::init(&config_path) {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut cfg = config::Config::load(&config_path)?;

    // CLI takes precedence over the config file
    if let Some(model) = args.model {
        cfg.model = Some(model);
    }
    if let Some(base_url) = args.base_url {
        cfg.base_url = Some(base_url);
    }
    if let Some(debounce_ms) = args.debounce_ms {
        cfg.orchestrator.debounce_ms = debounce_ms;
    }

    let Some(api_key) = cfg.api_key() else {
        eprintln!("Error: No API key found");
        eprintln!();
        eprintln!("Set your API key with: export OPENAI_API_KEY=your-key");
        eprintln!("Or add it to config file: comanda --init-config");
        std::process::exit(1);
    };

    let model = Model::new(cfg.model_id(), cfg.base_url());
    let provider = Arc::new(OpenAiCompatible::new(api_key, model));
    let service = Arc::new(
        ProviderService::new(provider)
            .with_retry(cfg.orchestrator.retry.clone())
            .with_timeout(cfg.orchestrator.llm_timeout()),
    );

    let store = Arc::new(store::Store::demo());
    let catalog = Arc::new(tools::demo_catalog(store));
    let channel = Arc::new(console::ConsoleChannel::stdout());
    let memory = Arc::new(MemoryLog::new(cfg.orchestrator.memory.clone()));

    let pipeline = Arc::new(Pipeline::new(
        service,
        catalog,
        channel.clone(),
        memory.clone(),
        &cfg.orchestrator,
    ));
    let scheduler = DebounceScheduler::new(pipeline.clone(), channel, &cfg.orchestrator);

    // Print turn progress alongside the replies
    let mut receiver = pipeline.subscribe();
    let events = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Some(line) = describe_event(&event) {
                        eprintln!("{}", line);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Event printer skipped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Expire idle conversations in the background
    let janitor_memory = memory.clone();
    let janitor = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let purged = janitor_memory.purge_expired(chrono::Utc::now());
            if purged > 0 {
                tracing::info!("Purged {} idle conversations", purged);
            }
        }
    });

    eprintln!(
        "comanda ready ({}). Type messages, or `user: message` to talk as another customer.",
        cfg.model_id()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some((user_id, text)) = parse_line(&line) else { continue };
                match scheduler.on_message(user_id, text) {
                    Disposition::Scheduled => {}
                    Disposition::RateLimited => eprintln!("[{}: message ignored, too fast]", user_id),
                    Disposition::Stopped => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, cancelling pending turns");
                scheduler.stop().await;
                break;
            }
        }
    }

    // Let buffered messages finish before exiting
    scheduler.drain().await;
    scheduler.stop().await;
    janitor.abort();
    events.abort();

    let diagnostics = scheduler.diagnostics();
    tracing::debug!(
        "Shut down with {} active tasks, {} users tracked in memory",
        diagnostics.active_tasks,
        memory.user_count()
    );
    Ok(())
}
