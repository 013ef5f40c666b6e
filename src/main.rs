// SPDX-License-Identifier: MPL-2.0

use clap::{Parser, Subcommand, ValueEnum};
use hearth::bot::{Bot, BotError, RefreshLoad};
use hearth::config::IS_DEVEL;
use hearth::feed::FeedAlgorithm;
use hearth::log::{Identity, JsonlLog, LogSource, MemoryLog, Message, MessageId, SourceError};
use hearth::runtime;
use hearth::state::FeedSettings;
use hearth::store::{FillReport, StoreConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Query a local view of a replicated message log
#[derive(Parser, Debug)]
#[command(name = "hearth", version)]
struct Cli {
    /// View database (defaults to the per-identity data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Identity the view is built for (@...ed25519)
    #[arg(long)]
    identity: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a newline-delimited JSON log export
    Ingest { log: PathBuf },
    /// Show a page of a feed
    Feed {
        kind: FeedKind,
        /// Identity, hashtag or root message key, depending on the feed
        arg: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Show a reply thread
    Thread { key: String },
    /// Full-text search over posts
    Search {
        query: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Follows, replies, mentions and likes addressed to the identity
    Reports {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// View counters
    Stats,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FeedKind {
    Home,
    Discover,
    Profile,
    Hashtag,
    Replies,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Bot(#[from] BotError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("{0}")]
    Usage(String),
}

fn main() -> ExitCode {
    let default_filter = if IS_DEVEL { "hearth=debug" } else { "hearth=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match runtime::block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let identity = Identity::new(cli.identity);
    if !identity.is_valid() {
        return Err(CliError::Usage(format!("not a feed identity: {identity}")));
    }

    match cli.command {
        Command::Ingest { log } => {
            let source = JsonlLog::open(&log, identity.clone())?;
            let bot = login(source, &identity, cli.db).await?;
            let result = ingest(&bot).await;
            bot.logout().await?;
            result
        }
        command => {
            let bot = login(MemoryLog::new(identity.clone()), &identity, cli.db).await?;
            let result = query(&bot, &identity, command).await;
            bot.logout().await?;
            result
        }
    }
}

async fn login<S: LogSource + 'static>(
    source: S,
    identity: &Identity,
    db: Option<PathBuf>,
) -> Result<Bot<S>, CliError> {
    let bot = Bot::new(source);
    let migration = bot
        .login(identity.clone(), db, StoreConfig::default())
        .await?;
    if migration.needs_resync() {
        info!("view is empty or was rebuilt; ingest the log again to fill it");
    }
    Ok(bot)
}

async fn ingest(bot: &Bot<JsonlLog>) -> Result<(), CliError> {
    let mut total = FillReport::default();
    loop {
        let report = bot.refresh(RefreshLoad::Long).await?;
        total.merge(&report.received);
        total.merge(&report.private);
        if report.caught_up() {
            break;
        }
    }

    println!(
        "inserted {} updated {} skipped {} (duplicates {}, forks {}, too old {}, invalid {}, failed {}) reports {}",
        total.inserted,
        total.updated,
        total.skipped(),
        total.duplicates,
        total.forks,
        total.too_old,
        total.invalid,
        total.failed,
        total.reports,
    );
    Ok(())
}

async fn query(bot: &Bot<MemoryLog>, identity: &Identity, command: Command) -> Result<(), CliError> {
    match command {
        Command::Ingest { .. } => {
            return Err(CliError::Usage("ingest needs a log file source".to_string()));
        }
        Command::Feed {
            kind,
            arg,
            limit,
            offset,
        } => {
            let algorithm = algorithm(kind, arg, identity)?;
            let total = bot.count(&algorithm).await?;
            let page = bot.fetch(&algorithm, limit, offset).await?;
            for message in &page {
                print_message(message);
            }
            println!("-- {} shown, {total} in feed", page.len());
        }
        Command::Thread { key } => {
            let thread = bot.thread(&MessageId::new(key)).await?;
            print_message(thread.root());
            print_replies(&thread, 0, 1);
        }
        Command::Search { query, limit } => {
            for message in bot.search(&query, limit).await? {
                print_message(&message);
            }
        }
        Command::Reports { limit } => {
            for report in bot.reports(limit, 0).await? {
                println!(
                    "{} {} by {} ({})",
                    format_time(report.created_at),
                    report.kind.label(),
                    report.by,
                    report.key
                );
            }
        }
        Command::Stats => {
            println!("{}", bot.statistics().await?);
        }
    }
    Ok(())
}

fn algorithm(kind: FeedKind, arg: Option<String>, identity: &Identity) -> Result<FeedAlgorithm, CliError> {
    let required = |what: &str| {
        arg.clone()
            .ok_or_else(|| CliError::Usage(format!("this feed needs a {what}")))
    };
    Ok(match kind {
        FeedKind::Home => FeedSettings::load().home,
        FeedKind::Discover => FeedSettings::load().discover,
        FeedKind::Profile => FeedAlgorithm::Profile {
            identity: arg.clone().map(Identity::new).unwrap_or_else(|| identity.clone()),
        },
        FeedKind::Hashtag => FeedAlgorithm::Hashtag {
            name: required("hashtag")?,
        },
        FeedKind::Replies => FeedAlgorithm::Replies {
            root: MessageId::new(required("root message key")?),
        },
    })
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

fn print_message(message: &Message) {
    let who = message
        .author_name
        .clone()
        .unwrap_or_else(|| message.author.to_string());
    println!(
        "{} {} [{}] {}",
        format_time(message.claimed_at),
        who,
        message.content_type,
        message.key
    );
    if let Some(text) = message.text() {
        for line in text.lines() {
            println!("    {line}");
        }
    }
}

fn print_replies(thread: &hearth::log::Thread, index: usize, depth: usize) {
    // Branch edges are author-supplied and may loop
    if depth > thread.messages.len() {
        return;
    }
    for child in thread.children(index) {
        let message = &thread.messages[child];
        print!("{}", "  ".repeat(depth));
        print_message(message);
        print_replies(thread, child, depth + 1);
    }
}
