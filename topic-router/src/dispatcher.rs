//! Dispatcher: forwards pooled messages to the active topic slot.
//!
//! Switch requests and forwards are serialized in one task. Switches win ties, so nothing
//! reaches a slot after the switch away from it has been acknowledged. Each switch carries
//! the epoch of the replay or clear that follows it; forwards from an older epoch are
//! dropped, since that replay re-sends whatever is still pooled.

use chatroom_core::{Result, RouterError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::event::RouterEvent;
use crate::pool::Envelope;

/// Notice sent to the controller right before a message is handed to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub slot: usize,
    pub seq: u64,
}

pub(crate) struct Switch {
    slot: usize,
    epoch: u64,
    ack: oneshot::Sender<()>,
}

pub(crate) struct Dispatcher<In> {
    active: Option<usize>,
    epoch: u64,
    slots: Vec<mpsc::Sender<Envelope<In>>>,
    forward: mpsc::UnboundedReceiver<Envelope<In>>,
    switches: mpsc::Receiver<Switch>,
    delivered: mpsc::UnboundedSender<Delivery>,
    events: broadcast::Sender<RouterEvent>,
}

#[derive(Clone)]
pub(crate) struct DispatcherHandle {
    tx: mpsc::Sender<Switch>,
}

/// Slot 0 starts as the destination; with no slots every forward is dropped.
pub(crate) fn dispatcher<In>(
    slots: Vec<mpsc::Sender<Envelope<In>>>,
    forward: mpsc::UnboundedReceiver<Envelope<In>>,
    delivered: mpsc::UnboundedSender<Delivery>,
    events: broadcast::Sender<RouterEvent>,
) -> (Dispatcher<In>, DispatcherHandle) {
    let (tx, switches) = mpsc::channel(8);
    let active = if slots.is_empty() { None } else { Some(0) };
    let dispatcher = Dispatcher {
        active,
        epoch: 0,
        slots,
        forward,
        switches,
        delivered,
        events,
    };
    (dispatcher, DispatcherHandle { tx })
}

impl<In: Send + Sync + 'static> Dispatcher<In> {
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                switch = self.switches.recv() => match switch {
                    Some(switch) => self.adopt(switch),
                    None => break,
                },
                envelope = self.forward.recv() => match envelope {
                    Some(envelope) => {
                        if !self.deliver(envelope).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        debug!("dispatcher: stopping");
    }

    fn adopt(&mut self, switch: Switch) {
        debug!(
            from = ?self.active,
            to = switch.slot,
            epoch = switch.epoch,
            "dispatcher: destination switched"
        );
        self.active = Some(switch.slot);
        self.epoch = self.epoch.max(switch.epoch);
        let _ = switch.ack.send(());
    }

    /// Returns false once the controller is gone.
    async fn deliver(&mut self, envelope: Envelope<In>) -> bool {
        loop {
            if envelope.epoch < self.epoch {
                debug!(
                    seq = envelope.seq,
                    epoch = envelope.epoch,
                    current = self.epoch,
                    "dispatcher: superseded forward dropped"
                );
                return true;
            }
            let Some(slot) = self.active else {
                warn!(seq = envelope.seq, "dispatcher: destination not set, dropping message");
                return true;
            };
            let destination = self.slots[slot].clone();
            tokio::select! {
                biased;
                switch = self.switches.recv() => match switch {
                    Some(switch) => self.adopt(switch),
                    None => return false,
                },
                permit = destination.reserve() => {
                    match permit {
                        Ok(permit) => {
                            let seq = envelope.seq;
                            let _ = self.delivered.send(Delivery { slot, seq });
                            let _ = self.events.send(RouterEvent::Offered { slot, seq });
                            permit.send(envelope);
                            debug!(slot, seq, "dispatcher: forwarded");
                        }
                        Err(_) => warn!(slot, seq = envelope.seq, "dispatcher: slot closed, dropping message"),
                    }
                    return true;
                }
            }
        }
    }
}

impl DispatcherHandle {
    /// Makes `slot` the destination for every forward after this returns and drops
    /// forwards older than `epoch`.
    pub(crate) async fn switch_to(&self, slot: usize, epoch: u64) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        let stopped = || RouterError::Stopped("dispatcher task is gone".to_string());
        self.tx
            .send(Switch { slot, epoch, ack })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }
}
