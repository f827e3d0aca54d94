use async_trait::async_trait;
use chatroom_core::{Outbox, Result, TextMessage, Topic, Verdict};
use tracing::info;

/// Claims one exact keyword and answers it with a fixed reply (e.g. `get` → sign-in link).
pub struct KeywordTopic {
    keyword: String,
    reply: String,
}

impl KeywordTopic {
    pub fn new(keyword: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl Topic<TextMessage, String> for KeywordTopic {
    async fn talk(&mut self, message: &TextMessage, outbox: &Outbox<String>) -> Result<Verdict> {
        if message.text.trim() != self.keyword {
            return Ok(Verdict::Declined);
        }
        info!(keyword = %self.keyword, user = ?message.user, "keyword matched");
        outbox.send(self.reply.clone()).await?;
        Ok(Verdict::Claimed)
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_keyword_claims_exact_match_only() {
        let (tx, mut rx) = mpsc::channel(4);
        let outbox = Outbox::new(tx);
        let mut topic = KeywordTopic::new("get", "https://example.com/auth");

        let verdict = topic.talk(&TextMessage::new("get"), &outbox).await.unwrap();
        assert_eq!(verdict, Verdict::Claimed);
        assert_eq!(rx.recv().await.as_deref(), Some("https://example.com/auth"));

        let verdict = topic.talk(&TextMessage::new("get me"), &outbox).await.unwrap();
        assert_eq!(verdict, Verdict::Declined);
        assert!(rx.try_recv().is_err());
    }
}
