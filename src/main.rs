//! # chippy
//!
//! Reply bot binary: loads settings, opens the message store and wires the
//! console platform to the completion service.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chippy_core::loader::{load_settings_from_path, settings_path};
use chippy_core::platform::{Author, InboundMessage};
use chippy_core::{BotSettings, MessageId};
use chippy_engine::console::parse_event;
use chippy_engine::{pipeline, BotContext, ConsolePlatform, ContextSeeder, Outbound};
use chippy_llm::{OpenAiConfig, OpenAiImageGenerator, OpenAiProvider, RetryingProvider};
use chippy_store::{Database, MessageRepo, ThreadResolver};
use chippy_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

/// Thread-aware chat reply bot.
#[derive(Parser, Debug)]
#[command(name = "chippy", about = "Thread-aware chat reply bot")]
struct Cli {
    /// Settings file (defaults to ~/.chippy/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Path to the `SQLite` message store (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Human-readable logs instead of JSON.
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read events from stdin as JSON lines and write replies to stdout.
    Run {
        /// User id of the bot account.
        #[arg(long, default_value_t = 1)]
        bot_id: u64,
    },
    /// Print the thread ending at a stored message, as it would be submitted.
    Thread { id: i64 },
    /// Delete every stored message.
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if let Some(db_path) = cli.db_path {
        settings.database_path = db_path;
    }

    let format = if cli.pretty { LogFormat::Pretty } else { LogFormat::Json };
    let _telemetry = init_telemetry(
        &TelemetryConfig {
            format,
            ..TelemetryConfig::default()
        }
        .with_debug(settings.debug),
    );

    let db = Database::open(&settings.database_path)
        .with_context(|| format!("Failed to open database: {}", settings.database_path.display()))?;
    let repo = MessageRepo::new(db);

    match cli.command {
        Command::Run { bot_id } => run_bot(settings, repo, bot_id).await,
        Command::Thread { id } => print_thread(&settings, &repo, MessageId::new(id)),
        Command::Reset => {
            let removed = repo.reset()?;
            println!("removed {removed} messages");
            Ok(())
        }
    }
}

async fn run_bot(settings: BotSettings, repo: MessageRepo, bot_id: u64) -> Result<()> {
    let api_key = settings
        .api_key
        .clone()
        .context("OPENAI_API_KEY is not set")?;
    let chat = OpenAiConfig::new(api_key.clone(), settings.chat_model.clone())
        .with_base_url(settings.api_base_url.clone());
    let completion = RetryingProvider::from_settings(OpenAiProvider::new(chat)?, &settings);

    let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<InboundMessage>();
    let bot = Author::new(bot_id, settings.bot_name.clone());
    let platform = Arc::new(ConsolePlatform::new(bot, out_tx).with_feedback(event_tx.clone()));

    let mut ctx = BotContext::new(settings.clone(), platform.clone(), Arc::new(completion), repo);
    if settings.allow_images {
        let images = OpenAiConfig::new(api_key, settings.image_model.clone())
            .with_base_url(settings.api_base_url.clone());
        ctx = ctx.with_images(Arc::new(OpenAiImageGenerator::new(images)?));
    }
    ctx.seeder().seed_sentinel(ctx.store())?;

    let cancel = CancellationToken::new();
    let writer = tokio::spawn(write_replies(out_rx));
    let reader = tokio::spawn(read_events(platform.clone(), event_tx, cancel.clone()));
    let signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                cancel.cancel();
            }
        })
    };

    pipeline::run(Arc::new(ctx), event_rx, cancel).await;

    signal.abort();
    reader.abort();
    drop(platform);
    writer.await??;
    Ok(())
}

/// Forward stdin lines to the event loop. End of input stops the loop.
async fn read_events(platform: Arc<ConsolePlatform>, events: mpsc::UnboundedSender<InboundMessage>, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_event(&line) {
                    Ok(Some(msg)) => {
                        platform.record(&msg);
                        if events.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "skipping malformed event line"),
                },
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to read stdin");
                    break;
                }
            },
        }
    }
    cancel.cancel();
}

async fn write_replies(mut replies: mpsc::UnboundedReceiver<Outbound>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(reply) = replies.recv().await {
        let mut line = serde_json::to_vec(&reply)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn print_thread(settings: &BotSettings, repo: &MessageRepo, id: MessageId) -> Result<()> {
    let thread = ThreadResolver::new(repo.clone())
        .with_max_depth(settings.max_thread_depth)
        .resolve(id)
        .with_context(|| format!("Cannot resolve thread for message {id}"))?;
    let seeder = ContextSeeder::from_settings(settings);
    match seeder.prepare(thread) {
        Some(messages) => println!("{}", serde_json::to_string_pretty(&messages)?),
        None => println!("thread for message {id} has no system root and would not be answered"),
    }
    Ok(())
}
