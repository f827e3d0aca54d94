//! chatroom CLI: routes chat lines from stdin through the topic router, replies go to stdout.
//! Config from env (and .env), with CLI args taking precedence.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chatroom_cli::input::InputFormat;
use chatroom_cli::topics::load_candidates;
use chatroom_cli::{build_router, run, RunOptions};
use chatroom_core::{init_tracing, RouterConfig};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::info;

#[derive(Parser)]
#[command(name = "chatroom")]
#[command(about = "Chat router CLI: offer each message to the topics in priority order", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read messages from stdin, one per line, and print replies.
    Run {
        /// Lines are JSON objects with `user_name` and `text`.
        #[arg(long)]
        json: bool,
        /// Messages from this user are dropped (the bot's own posts).
        #[arg(long, default_value = "slackbot")]
        ignore_user: String,
        /// Roulette candidates (JSON array); falls back to ROULETTE_CANDIDATES_FILE.
        #[arg(short, long)]
        candidates: Option<PathBuf>,
        /// Reply to `get`; falls back to AUTH_URL.
        #[arg(long)]
        auth_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            json,
            ignore_user,
            candidates,
            auth_url,
        } => handle_run(json, ignore_user, candidates, auth_url).await,
    }
}

async fn handle_run(
    json: bool,
    ignore_user: String,
    candidates: Option<PathBuf>,
    auth_url: Option<String>,
) -> Result<()> {
    let config = RouterConfig::load().context("Load router config from env")?;
    config.validate()?;
    init_tracing(&config.log_file)?;

    let candidates = match candidates.or_else(|| std::env::var("ROULETTE_CANDIDATES_FILE").ok().map(PathBuf::from)) {
        Some(path) => load_candidates(&path)?,
        None => Vec::new(),
    };
    let options = RunOptions {
        format: if json { InputFormat::Json } else { InputFormat::Text },
        ignore_user: Some(ignore_user).filter(|u| !u.is_empty()),
        auth_url: auth_url
            .or_else(|| std::env::var("AUTH_URL").ok())
            .unwrap_or_default(),
        candidates,
    };
    info!(
        candidates = options.candidates.len(),
        ignore_user = ?options.ignore_user,
        "Starting chatroom"
    );

    let router = build_router(&options, &config)?;
    let input = BufReader::new(tokio::io::stdin());
    let summary = run(router, input, tokio::io::stdout(), &options).await?;
    info!(routed = summary.routed, ignored = summary.ignored, "Chatroom finished");
    Ok(())
}
