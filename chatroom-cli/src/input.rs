//! Turns stdin lines into [`TextMessage`]s.

use anyhow::{Context, Result};
use chatroom_core::TextMessage;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputFormat {
    /// Each line is the message text.
    #[default]
    Text,
    /// Each line is a JSON object with the outgoing-webhook fields `user_name` and `text`.
    Json,
}

#[derive(Debug, Deserialize)]
struct WebhookLine {
    #[serde(default)]
    user_name: Option<String>,
    text: String,
}

/// Parses one line. Blank lines yield `None`.
pub fn parse_line(line: &str, format: InputFormat) -> Result<Option<TextMessage>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let message = match format {
        InputFormat::Text => TextMessage::new(line),
        InputFormat::Json => {
            let parsed: WebhookLine = serde_json::from_str(line)
                .with_context(|| format!("Invalid JSON input line: {}", line))?;
            let message = TextMessage::new(parsed.text);
            match parsed.user_name.filter(|u| !u.is_empty()) {
                Some(user) => message.with_user(user),
                None => message,
            }
        }
    };
    Ok(Some(message))
}

/// False for messages posted by `ignore_user` (the bot's own posts echoed back).
pub fn should_route(message: &TextMessage, ignore_user: Option<&str>) -> bool {
    match (message.user.as_deref(), ignore_user) {
        (Some(user), Some(ignored)) => user != ignored,
        _ => true,
    }
}
