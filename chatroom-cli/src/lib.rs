//! # chatroom-cli
//!
//! Line-driven front end for the topic router: reads messages, drops the bot's own posts,
//! routes the rest through [`Router`], and writes every reply on its own line.

pub mod input;
pub mod topics;

use anyhow::{Context, Result};
use chatroom_core::{RouterConfig, TextMessage};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use topic_router::{Router, RouterBuilder, RouterEvent};
use tracing::{debug, info, instrument, warn};

use input::{parse_line, should_route, InputFormat};
use topics::{Candidate, KeywordTopic, RouletteTopic};

/// Keyword that asks for the sign-in link.
pub const AUTH_KEYWORD: &str = "get";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub format: InputFormat,
    /// Messages from this user are never routed.
    pub ignore_user: Option<String>,
    /// Reply to the auth keyword.
    pub auth_url: String,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub routed: usize,
    pub ignored: usize,
}

/// Keyword topic first, roulette second.
pub fn build_router(options: &RunOptions, config: &RouterConfig) -> Result<Router<TextMessage, String>> {
    let roulette = RouletteTopic::new(options.candidates.clone())
        .context("Failed to build roulette topic")?;
    Ok(RouterBuilder::from_config(config)
        .topic(KeywordTopic::new(AUTH_KEYWORD, options.auth_url.clone()))
        .topic(roulette)
        .build())
}

/// Routes every input line and writes replies to `output` until `input` ends.
///
/// Each message is routed to completion (claimed or declined by every topic) before the
/// next line is read.
#[instrument(skip_all)]
pub async fn run<R, W>(
    mut router: Router<TextMessage, String>,
    input: R,
    output: W,
    options: &RunOptions,
) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut outbound = router
        .take_outbound()
        .context("Router outbound already taken")?;
    let printer = tokio::spawn(async move {
        let mut output = output;
        while let Some(reply) = outbound.recv().await {
            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        output.shutdown().await?;
        Ok::<_, std::io::Error>(())
    });

    let mut events = router.subscribe();
    let mut summary = RunSummary::default();
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        let message = match parse_line(&line, options.format) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "skipping unreadable input line");
                continue;
            }
        };
        if !should_route(&message, options.ignore_user.as_deref()) {
            debug!(user = ?message.user, "ignoring message from ignored user");
            summary.ignored += 1;
            continue;
        }
        info!(user = ?message.user, text = %message.text, "-> routing message");
        router.send(message).await?;
        wait_for_pass(&mut events).await?;
        summary.routed += 1;
    }

    info!(routed = summary.routed, ignored = summary.ignored, "input finished");
    router.shutdown();
    printer
        .await
        .context("Reply printer task failed")?
        .context("Failed to write reply")?;
    Ok(summary)
}

/// Waits until the router clears its pool, i.e. the current pass is over.
async fn wait_for_pass(events: &mut broadcast::Receiver<RouterEvent>) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(RouterEvent::Cleared { .. }) => return Ok(()),
            Ok(event) => debug!(event = ?event, "router event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "router events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                anyhow::bail!("Router stopped while routing a message")
            }
        }
    }
}
