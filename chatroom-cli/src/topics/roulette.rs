//! Lunch roulette: `ごはんルーレット [place]` picks a random place one of the members has been to.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chatroom_core::{Outbox, Result, TextMessage, Topic, Verdict};
use rand::RngExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Reply when there is no candidate to choose from.
pub const NOBODY_REPLY: &str = "だれもいません。";

const DEFAULT_PLACE: &str = "会津若松";
const TRIGGER: &str = r"^ご(?:はん|飯)(?:るーれっと|ルーレット)[ 　]?(.*)?$";

/// A venue visited by a member. `area` limits it to one place name; `None` matches any place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub venue: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub area: Option<String>,
}

impl Candidate {
    fn matches(&self, place: &str) -> bool {
        self.area.as_deref().map_or(true, |area| area == place)
    }

    fn describe(&self) -> String {
        format!("{} (by {} {})", self.venue, self.first_name, self.last_name)
    }
}

/// Reads a JSON array of candidates.
pub fn load_candidates(path: &Path) -> anyhow::Result<Vec<Candidate>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read candidates file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid candidates file {}", path.display()))
}

pub struct RouletteTopic {
    trigger: Regex,
    candidates: Vec<Candidate>,
}

impl RouletteTopic {
    pub fn new(candidates: Vec<Candidate>) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            trigger: Regex::new(TRIGGER)?,
            candidates,
        })
    }

    /// Place named after the trigger word, or the default place. `None` if not triggered.
    pub fn parse_place(&self, text: &str) -> Option<String> {
        let captures = self.trigger.captures(text.trim())?;
        let place = captures
            .get(1)
            .map(|m| m.as_str().trim())
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PLACE);
        Some(place.to_string())
    }

    fn pick(&self, place: &str) -> String {
        let pool: Vec<&Candidate> = self.candidates.iter().filter(|c| c.matches(place)).collect();
        debug!(place, candidates = pool.len(), "roulette: candidates for place");
        if pool.is_empty() {
            return NOBODY_REPLY.to_string();
        }
        let index = rand::rng().random_range(0..pool.len());
        pool[index].describe()
    }
}

#[async_trait]
impl Topic<TextMessage, String> for RouletteTopic {
    async fn talk(&mut self, message: &TextMessage, outbox: &Outbox<String>) -> Result<Verdict> {
        let Some(place) = self.parse_place(&message.text) else {
            return Ok(Verdict::Declined);
        };
        let reply = self.pick(&place);
        info!(place = %place, reply = %reply, "roulette: picked");
        outbox.send(reply).await?;
        Ok(Verdict::Claimed)
    }

    fn name(&self) -> &str {
        "roulette"
    }
}
