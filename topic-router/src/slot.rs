//! Topic slot: one task per topic that runs it once per delivered message and reports back.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use chatroom_core::{Outbox, Topic, Verdict};
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::pool::Envelope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Verdict(Verdict),
    /// The topic returned an error or panicked.
    Failed(String),
}

/// A slot's answer for the message numbered `seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Report {
    pub seq: u64,
    pub outcome: Outcome,
}

pub(crate) struct TopicSlot<In, Out> {
    index: usize,
    topic: Box<dyn Topic<In, Out>>,
    inbox: mpsc::Receiver<Envelope<In>>,
    outbox: Outbox<Out>,
    reports: mpsc::UnboundedSender<Report>,
}

impl<In, Out> TopicSlot<In, Out>
where
    In: Send + Sync + 'static,
    Out: Send + 'static,
{
    pub(crate) fn new(
        index: usize,
        topic: Box<dyn Topic<In, Out>>,
        inbox: mpsc::Receiver<Envelope<In>>,
        outbox: Outbox<Out>,
        reports: mpsc::UnboundedSender<Report>,
    ) -> Self {
        Self {
            index,
            topic,
            inbox,
            outbox,
            reports,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(envelope) = self.inbox.recv().await {
            let outcome = self.invoke(&envelope).await;
            debug!(
                slot = self.index,
                topic = %self.topic.name(),
                seq = envelope.seq,
                outcome = ?outcome,
                "slot: topic answered"
            );
            let report = Report {
                seq: envelope.seq,
                outcome,
            };
            if self.reports.send(report).is_err() {
                break;
            }
        }
        debug!(slot = self.index, "slot: stopping");
    }

    async fn invoke(&mut self, envelope: &Envelope<In>) -> Outcome {
        let talk = self.topic.talk(envelope.message.as_ref(), &self.outbox);
        let result = AssertUnwindSafe(talk).catch_unwind().await;
        match result {
            Ok(Ok(verdict)) => Outcome::Verdict(verdict),
            Ok(Err(e)) => {
                warn!(
                    slot = self.index,
                    topic = %self.topic.name(),
                    seq = envelope.seq,
                    error = %e,
                    "slot: topic failed, treating as declined"
                );
                Outcome::Failed(e.to_string())
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(
                    slot = self.index,
                    topic = %self.topic.name(),
                    seq = envelope.seq,
                    panic = %reason,
                    "slot: topic panicked, treating as declined"
                );
                Outcome::Failed(reason)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}
