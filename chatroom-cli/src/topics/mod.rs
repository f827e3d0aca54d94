//! Topics shipped with the CLI, in the priority order the CLI registers them.

mod keyword;
mod roulette;

pub use keyword::KeywordTopic;
pub use roulette::{load_candidates, Candidate, RouletteTopic, NOBODY_REPLY};
