//! Message pool: records every inbound message since the last clear and forwards it live.
//!
//! The pool task is the only owner of the backlog. The controller talks to it through
//! [`PoolHandle`]: `clear`, `replay`, and `hold`, which freezes intake while the active
//! destination is being switched.
//!
//! Every clear and replay starts a new epoch. Envelopes carry the epoch they were forwarded
//! in, so the dispatcher can drop forwards that a later replay or clear superseded.

use std::sync::Arc;

use chatroom_core::{Result, RouterError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::event::RouterEvent;

/// A pooled message with its arrival number.
#[derive(Debug)]
pub(crate) struct Envelope<In> {
    pub seq: u64,
    pub epoch: u64,
    pub message: Arc<In>,
}

impl<In> Clone for Envelope<In> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            epoch: self.epoch,
            message: Arc::clone(&self.message),
        }
    }
}

/// Producer side of the inbound rendezvous: acked with the seq once the message is pooled.
pub(crate) struct Handoff<In> {
    pub message: In,
    pub ack: oneshot::Sender<u64>,
}

/// Result of a clear. Every message numbered below `floor` is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cleared {
    pub dropped: usize,
    pub floor: u64,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Replayed {
    pub count: usize,
    pub epoch: u64,
}

pub(crate) enum PoolCommand {
    Clear {
        ack: oneshot::Sender<Cleared>,
    },
    Replay {
        ack: oneshot::Sender<Replayed>,
    },
    /// Stop taking inbound messages until the next Clear or Replay, but only if nothing
    /// newer than `through` is pooled. `None` holds unconditionally.
    Hold {
        through: Option<u64>,
        ack: oneshot::Sender<bool>,
    },
}

pub(crate) struct MessagePool<In> {
    pool: Vec<Envelope<In>>,
    next_seq: u64,
    epoch: u64,
    held: bool,
    inbound: mpsc::Receiver<Handoff<In>>,
    inbound_open: bool,
    commands: mpsc::Receiver<PoolCommand>,
    forward: mpsc::UnboundedSender<Envelope<In>>,
    /// Tells the controller a message is waiting for a verdict.
    recorded: mpsc::UnboundedSender<u64>,
    events: broadcast::Sender<RouterEvent>,
}

/// Controller-side handle to the pool task.
#[derive(Clone)]
pub(crate) struct PoolHandle {
    tx: mpsc::Sender<PoolCommand>,
}

pub(crate) fn message_pool<In>(
    inbound: mpsc::Receiver<Handoff<In>>,
    forward: mpsc::UnboundedSender<Envelope<In>>,
    recorded: mpsc::UnboundedSender<u64>,
    events: broadcast::Sender<RouterEvent>,
) -> (MessagePool<In>, PoolHandle) {
    let (tx, commands) = mpsc::channel(8);
    let pool = MessagePool {
        pool: Vec::new(),
        next_seq: 0,
        epoch: 0,
        held: false,
        inbound,
        inbound_open: true,
        commands,
        forward,
        recorded,
        events,
    };
    (pool, PoolHandle { tx })
}

impl<In: Send + Sync + 'static> MessagePool<In> {
    pub(crate) async fn run(mut self) {
        loop {
            let accepting = !self.held && self.inbound_open;
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => {
                        debug!("pool: controller gone, stopping");
                        break;
                    }
                },
                handoff = self.inbound.recv(), if accepting => match handoff {
                    Some(handoff) => self.record(handoff),
                    None => {
                        info!(pooled = self.pool.len(), "pool: inbound closed, no more messages");
                        self.inbound_open = false;
                    }
                },
            }
        }
    }

    fn record(&mut self, handoff: Handoff<In>) {
        let envelope = Envelope {
            seq: self.next_seq,
            epoch: self.epoch,
            message: Arc::new(handoff.message),
        };
        self.next_seq += 1;
        self.pool.push(envelope.clone());
        debug!(seq = envelope.seq, pooled = self.pool.len(), "pool: recorded");
        let _ = handoff.ack.send(envelope.seq);
        let _ = self.recorded.send(envelope.seq);
        let _ = self.events.send(RouterEvent::Recorded { seq: envelope.seq });
        self.forward(envelope);
    }

    fn forward(&self, envelope: Envelope<In>) {
        if self.forward.send(envelope).is_err() {
            warn!("pool: dispatcher gone, message not forwarded");
        }
    }

    fn apply(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::Clear { ack } => {
                let dropped = self.pool.len();
                self.pool.clear();
                self.epoch += 1;
                self.held = false;
                debug!(dropped, floor = self.next_seq, epoch = self.epoch, "pool: cleared");
                let _ = ack.send(Cleared {
                    dropped,
                    floor: self.next_seq,
                    epoch: self.epoch,
                });
            }
            PoolCommand::Replay { ack } => {
                self.epoch += 1;
                for envelope in &mut self.pool {
                    envelope.epoch = self.epoch;
                }
                for envelope in &self.pool {
                    self.forward(envelope.clone());
                }
                self.held = false;
                debug!(replayed = self.pool.len(), epoch = self.epoch, "pool: replayed backlog");
                let _ = ack.send(Replayed {
                    count: self.pool.len(),
                    epoch: self.epoch,
                });
            }
            PoolCommand::Hold { through, ack } => {
                let newest = self.pool.last().map(|envelope| envelope.seq);
                let settled = match (through, newest) {
                    (None, _) | (_, None) => true,
                    (Some(through), Some(newest)) => newest <= through,
                };
                if settled {
                    self.held = true;
                }
                let _ = ack.send(settled);
            }
        }
    }
}

fn stopped() -> RouterError {
    RouterError::Stopped("message pool task is gone".to_string())
}

impl PoolHandle {
    async fn request<T>(&self, command: PoolCommand, rx: oneshot::Receiver<T>) -> Result<T> {
        self.tx.send(command).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Empties the pool and resumes intake.
    pub(crate) async fn clear(&self) -> Result<Cleared> {
        let (ack, rx) = oneshot::channel();
        self.request(PoolCommand::Clear { ack }, rx).await
    }

    /// Re-forwards the backlog in arrival order under a new epoch and resumes intake.
    pub(crate) async fn replay(&self) -> Result<Replayed> {
        let (ack, rx) = oneshot::channel();
        self.request(PoolCommand::Replay { ack }, rx).await
    }

    /// Freezes intake if no message newer than `through` is pooled.
    pub(crate) async fn hold(&self, through: Option<u64>) -> Result<bool> {
        let (ack, rx) = oneshot::channel();
        self.request(PoolCommand::Hold { through, ack }, rx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Harness {
        inbound: mpsc::Sender<Handoff<String>>,
        forwarded: mpsc::UnboundedReceiver<Envelope<String>>,
        recorded: mpsc::UnboundedReceiver<u64>,
        handle: PoolHandle,
    }

    impl Harness {
        /// Queues a message without waiting for the pool to take it.
        async fn offer(&self, text: &str) -> oneshot::Receiver<u64> {
            let (ack, rx) = oneshot::channel();
            let handoff = Handoff {
                message: text.to_string(),
                ack,
            };
            self.inbound.send(handoff).await.unwrap();
            rx
        }

        async fn submit(&self, text: &str) -> u64 {
            self.offer(text).await.await.unwrap()
        }
    }

    fn spawn_pool() -> Harness {
        let (inbound, inbound_rx) = mpsc::channel(1);
        let (forward_tx, forwarded) = mpsc::unbounded_channel();
        let (recorded_tx, recorded) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(16);
        let (pool, handle) = message_pool(inbound_rx, forward_tx, recorded_tx, events);
        tokio::spawn(pool.run());
        Harness {
            inbound,
            forwarded,
            recorded,
            handle,
        }
    }

    async fn next(forwarded: &mut mpsc::UnboundedReceiver<Envelope<String>>) -> (u64, u64, String) {
        let envelope = timeout(Duration::from_secs(1), forwarded.recv())
            .await
            .expect("nothing forwarded")
            .expect("forward channel closed");
        (envelope.seq, envelope.epoch, envelope.message.as_ref().clone())
    }

    #[tokio::test]
    async fn test_record_forwards_and_replay_keeps_order() {
        let mut h = spawn_pool();
        assert_eq!(h.submit("a").await, 0);
        assert_eq!(h.submit("b").await, 1);

        assert_eq!(next(&mut h.forwarded).await, (0, 0, "a".to_string()));
        assert_eq!(next(&mut h.forwarded).await, (1, 0, "b".to_string()));
        assert_eq!(h.recorded.recv().await, Some(0));
        assert_eq!(h.recorded.recv().await, Some(1));

        let replayed = h.handle.replay().await.unwrap();
        assert_eq!(replayed, Replayed { count: 2, epoch: 1 });
        assert_eq!(next(&mut h.forwarded).await, (0, 1, "a".to_string()));
        assert_eq!(next(&mut h.forwarded).await, (1, 1, "b".to_string()));
    }

    #[tokio::test]
    async fn test_clear_empties_pool_and_reports_floor() {
        let mut h = spawn_pool();
        h.submit("a").await;
        next(&mut h.forwarded).await;

        let cleared = h.handle.clear().await.unwrap();
        assert_eq!(
            cleared,
            Cleared {
                dropped: 1,
                floor: 1,
                epoch: 1
            }
        );

        assert_eq!(h.handle.replay().await.unwrap().count, 0);
        assert!(timeout(Duration::from_millis(50), h.forwarded.recv())
            .await
            .is_err());

        assert_eq!(h.submit("b").await, 1);
        assert_eq!(next(&mut h.forwarded).await, (1, 2, "b".to_string()));
    }

    #[tokio::test]
    async fn test_hold_refused_when_newer_message_pooled() {
        let mut h = spawn_pool();
        h.submit("a").await;
        h.submit("b").await;
        next(&mut h.forwarded).await;
        next(&mut h.forwarded).await;

        assert!(!h.handle.hold(Some(0)).await.unwrap());
        assert!(h.handle.hold(Some(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_held_pool_keeps_producer_waiting_until_clear() {
        let mut h = spawn_pool();
        h.submit("a").await;
        next(&mut h.forwarded).await;

        assert!(h.handle.hold(Some(0)).await.unwrap());
        let mut pending = h.offer("b").await;
        assert!(timeout(Duration::from_millis(50), &mut pending).await.is_err());
        assert!(h.forwarded.try_recv().is_err());

        let cleared = h.handle.clear().await.unwrap();
        assert_eq!(cleared.dropped, 1);
        assert_eq!(timeout(Duration::from_secs(1), pending).await.unwrap(), Ok(1));
        assert_eq!(next(&mut h.forwarded).await, (1, 1, "b".to_string()));
    }

    #[tokio::test]
    async fn test_unconditional_hold_on_empty_pool() {
        let h = spawn_pool();
        assert!(h.handle.hold(None).await.unwrap());
        assert!(h.handle.hold(Some(7)).await.unwrap());
    }
}
