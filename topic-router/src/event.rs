/// What the router did, in the order it did it. Subscribe with [`crate::Router::subscribe`].
///
/// `slot` is the topic's index in priority order; `seq` numbers inbound messages from 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// A message entered the pool.
    Recorded { seq: u64 },
    /// A message was handed to a topic.
    Offered { slot: usize, seq: u64 },
    Claimed { slot: usize, seq: u64 },
    Declined { slot: usize, seq: u64 },
    /// The topic returned an error or panicked; counted as a decline.
    Faulted { slot: usize, seq: u64, reason: String },
    /// No verdict within the configured timeout; counted as a decline.
    TimedOut { slot: usize },
    /// Control moved to the next topic and the backlog was replayed to it.
    Advanced { from: usize, to: usize, replayed: usize },
    /// Every topic declined.
    PassExhausted,
    Cleared { dropped: usize },
}
