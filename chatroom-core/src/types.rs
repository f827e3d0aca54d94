//! Core types: verdict, outbox, text message, and the Topic trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, RouterError};

/// Answer a topic gives for one offered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// The topic handles this message; the search stops here.
    Claimed,
    /// Not relevant; offer the message to the next topic.
    Declined,
}

impl Verdict {
    pub fn is_claimed(self) -> bool {
        matches!(self, Verdict::Claimed)
    }
}

impl From<bool> for Verdict {
    fn from(did_talk: bool) -> Self {
        if did_talk {
            Verdict::Claimed
        } else {
            Verdict::Declined
        }
    }
}

/// Sending half of the router's shared outbound channel. Every topic gets a clone.
#[derive(Debug)]
pub struct Outbox<Out> {
    tx: mpsc::Sender<Out>,
}

impl<Out> Clone for Outbox<Out> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<Out: Send> Outbox<Out> {
    pub fn new(tx: mpsc::Sender<Out>) -> Self {
        Self { tx }
    }

    /// Hands one reply to the consumer; waits while the outbound channel is full.
    pub async fn send(&self, out: Out) -> Result<()> {
        self.tx
            .send(out)
            .await
            .map_err(|_| RouterError::OutboundClosed)
    }
}

/// A chat line as received from the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub user: Option<String>,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl TextMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            user: None,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// One conversational topic. An instance lives for the whole router lifetime, so any
/// multi-message exchange is tracked in `self`.
///
/// `talk` is called once per offered message and must eventually return. Replies go to
/// `outbox`; the router does not look at them. An `Err` is treated as a decline.
#[async_trait]
pub trait Topic<In, Out>: Send + 'static {
    async fn talk(&mut self, message: &In, outbox: &Outbox<Out>) -> Result<Verdict>;

    /// Name used in logs and events. Defaults to the implementing type.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_from_bool() {
        assert_eq!(Verdict::from(true), Verdict::Claimed);
        assert_eq!(Verdict::from(false), Verdict::Declined);
        assert!(Verdict::Claimed.is_claimed());
        assert!(!Verdict::Declined.is_claimed());
    }

    #[test]
    fn test_text_message_with_user() {
        let msg = TextMessage::new("get").with_user("alice");
        assert_eq!(msg.text, "get");
        assert_eq!(msg.user.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_outbox_send_and_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let outbox = Outbox::new(tx);
        outbox.send("hello".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));

        drop(rx);
        let err = outbox.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, RouterError::OutboundClosed));
    }
}
