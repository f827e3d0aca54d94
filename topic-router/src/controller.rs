//! Controller: walks the topics in priority order and decides who owns the conversation.
//!
//! For every pass it starts at slot 0. The active slot has to answer every message it was
//! handed; once it has answered the newest pooled message the pool is held and the
//! controller either restarts (on a claim, or after the last slot) or moves to the next
//! slot and replays the backlog to it.
//!
//! With a verdict timeout the clock runs whenever the active slot owes an answer: either a
//! delivered message is unanswered or the pool holds a message it has not judged yet (which
//! may still be stuck in front of a full slot inbox).

use std::collections::BTreeSet;
use std::time::Duration;

use chatroom_core::{Result, RouterError, Verdict};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::dispatcher::{Delivery, DispatcherHandle};
use crate::event::RouterEvent;
use crate::pool::PoolHandle;
use crate::slot::{Outcome, Report};

/// How often the pool is cleared when no topic is registered.
const IDLE_CLEAR_PERIOD: Duration = Duration::from_millis(100);

pub(crate) struct Controller {
    reports: Vec<mpsc::UnboundedReceiver<Report>>,
    delivered: mpsc::UnboundedReceiver<Delivery>,
    recorded: mpsc::UnboundedReceiver<u64>,
    pool: PoolHandle,
    dispatcher: DispatcherHandle,
    verdict_timeout: Option<Duration>,
    events: broadcast::Sender<RouterEvent>,
    /// Messages numbered below this were cleared; reports about them are stale.
    floor: u64,
    /// Newest message the pool has recorded.
    newest: Option<u64>,
    /// Current pool epoch; bumped by every clear and replay.
    epoch: u64,
}

enum Step {
    Recorded(u64),
    Delivered(Delivery),
    Report(Report),
    TimedOut,
    Closed,
}

struct Turn {
    claimed: bool,
}

impl Controller {
    pub(crate) fn new(
        reports: Vec<mpsc::UnboundedReceiver<Report>>,
        delivered: mpsc::UnboundedReceiver<Delivery>,
        recorded: mpsc::UnboundedReceiver<u64>,
        pool: PoolHandle,
        dispatcher: DispatcherHandle,
        verdict_timeout: Option<Duration>,
        events: broadcast::Sender<RouterEvent>,
    ) -> Self {
        Self {
            reports,
            delivered,
            recorded,
            pool,
            dispatcher,
            verdict_timeout,
            events,
            floor: 0,
            newest: None,
            epoch: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        let result = if self.reports.is_empty() {
            self.idle().await
        } else {
            self.route().await
        };
        if let Err(e) = result {
            debug!(error = %e, "controller: stopping");
        }
    }

    fn emit(&self, event: RouterEvent) {
        let _ = self.events.send(event);
    }

    async fn route(&mut self) -> Result<()> {
        loop {
            self.pass().await?;
        }
    }

    /// No topics: nothing can claim, so keep the pool from growing.
    async fn idle(&mut self) -> Result<()> {
        warn!("controller: no topics registered, inbound messages are dropped");
        let mut ticker = tokio::time::interval(IDLE_CLEAR_PERIOD);
        loop {
            ticker.tick().await;
            while self.recorded.try_recv().is_ok() {}
            let cleared = self.pool.clear().await?;
            self.floor = cleared.floor;
            self.epoch = cleared.epoch;
            if cleared.dropped > 0 {
                self.emit(RouterEvent::Cleared {
                    dropped: cleared.dropped,
                });
            }
        }
    }

    async fn pass(&mut self) -> Result<()> {
        let last = self.reports.len() - 1;
        let mut slot = 0;
        loop {
            let turn = self.attend(slot).await?;
            if turn.claimed {
                return self.restart().await;
            }
            if slot == last {
                info!("controller: pass exhausted, no topic claimed");
                self.emit(RouterEvent::PassExhausted);
                return self.restart().await;
            }
            self.advance(slot, slot + 1).await?;
            slot += 1;
        }
    }

    /// Waits until `slot` has answered everything it was handed, then holds the pool.
    #[instrument(level = "debug", skip(self))]
    async fn attend(&mut self, slot: usize) -> Result<Turn> {
        // Seqs delivered to `slot` and not answered yet.
        let mut owed = BTreeSet::new();
        let mut judged: Option<u64> = None;
        let mut claimed = false;
        let mut deadline: Option<Instant> = None;

        loop {
            let waiting = !owed.is_empty() || self.unjudged(judged);
            deadline = match (waiting, self.verdict_timeout) {
                (true, Some(limit)) => Some(deadline.unwrap_or_else(|| Instant::now() + limit)),
                _ => None,
            };

            match self.next_step(slot, deadline).await {
                Step::Recorded(seq) => {
                    self.newest = self.newest.max(Some(seq));
                    continue;
                }
                Step::Delivered(delivery) => {
                    self.count(slot, delivery, judged, &mut owed);
                    continue;
                }
                Step::Report(report) => {
                    if report.seq < self.floor {
                        debug!(seq = report.seq, floor = self.floor, "controller: stale report discarded");
                        continue;
                    }
                    // The report may overtake its delivery notice; `count` skips that one later.
                    owed.remove(&report.seq);
                    judged = judged.max(Some(report.seq));
                    deadline = None;
                    claimed |= self.note(slot, report);
                }
                Step::TimedOut => {
                    warn!(
                        timeout_ms = ?self.verdict_timeout.map(|d| d.as_millis()),
                        owed = owed.len(),
                        "controller: topic did not answer in time, treating as declined"
                    );
                    self.emit(RouterEvent::TimedOut { slot });
                    self.pool.hold(None).await?;
                    return Ok(Turn { claimed });
                }
                Step::Closed => {
                    return Err(RouterError::Stopped(format!("slot {} is gone", slot)));
                }
            }

            if owed.is_empty() && self.pool.hold(judged).await? {
                return Ok(Turn { claimed });
            }
        }
    }

    /// True if the pool holds a message newer than everything `judged` so far this turn.
    fn unjudged(&self, judged: Option<u64>) -> bool {
        self.newest
            .is_some_and(|newest| newest >= self.floor && judged.map_or(true, |j| newest > j))
    }

    fn count(&self, slot: usize, delivery: Delivery, judged: Option<u64>, owed: &mut BTreeSet<u64>) {
        if delivery.slot != slot {
            debug!(to = delivery.slot, seq = delivery.seq, "controller: delivery to inactive slot");
        } else if delivery.seq < self.floor {
            debug!(seq = delivery.seq, floor = self.floor, "controller: delivery of a cleared message");
        } else if judged.is_some_and(|j| delivery.seq <= j) {
            debug!(seq = delivery.seq, "controller: delivery notice after its report");
        } else {
            owed.insert(delivery.seq);
        }
    }

    async fn next_step(&mut self, slot: usize, deadline: Option<Instant>) -> Step {
        let delivered = &mut self.delivered;
        let reports = &mut self.reports[slot];
        let recorded = &mut self.recorded;
        let wait = async {
            tokio::select! {
                biased;
                Some(delivery) = delivered.recv() => Step::Delivered(delivery),
                Some(report) = reports.recv() => Step::Report(report),
                Some(seq) = recorded.recv() => Step::Recorded(seq),
                else => Step::Closed,
            }
        };
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, wait)
                .await
                .unwrap_or(Step::TimedOut),
            None => wait.await,
        }
    }

    /// Logs and publishes one answer. Returns true for a claim.
    fn note(&self, slot: usize, report: Report) -> bool {
        let seq = report.seq;
        match report.outcome {
            Outcome::Verdict(Verdict::Claimed) => {
                info!(seq, "controller: topic claimed the message");
                self.emit(RouterEvent::Claimed { slot, seq });
                true
            }
            Outcome::Verdict(Verdict::Declined) => {
                debug!(seq, "controller: topic declined the message");
                self.emit(RouterEvent::Declined { slot, seq });
                false
            }
            Outcome::Failed(reason) => {
                self.emit(RouterEvent::Faulted { slot, seq, reason });
                false
            }
        }
    }

    /// Pool is held. Point the dispatcher back at slot 0, then clear (which resumes intake).
    async fn restart(&mut self) -> Result<()> {
        self.dispatcher.switch_to(0, self.epoch + 1).await?;
        let cleared = self.pool.clear().await?;
        self.floor = cleared.floor;
        self.epoch = cleared.epoch;
        debug!(dropped = cleared.dropped, "controller: pool cleared, back to slot 0");
        self.emit(RouterEvent::Cleared {
            dropped: cleared.dropped,
        });
        Ok(())
    }

    /// Pool is held. Switch to `to` and replay the backlog to it (which resumes intake).
    async fn advance(&mut self, from: usize, to: usize) -> Result<()> {
        self.dispatcher.switch_to(to, self.epoch + 1).await?;
        let replayed = self.pool.replay().await?;
        self.epoch = replayed.epoch;
        let replayed = replayed.count;
        info!(from, to, replayed, "controller: declined, offering backlog to next topic");
        self.emit(RouterEvent::Advanced { from, to, replayed });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::dispatcher;
    use crate::pool::{message_pool, Envelope, Handoff};
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    /// One-slot controller whose delivery notices and reports are fed by hand.
    struct Harness {
        inbound: mpsc::Sender<Handoff<String>>,
        reports: mpsc::UnboundedSender<Report>,
        delivered: mpsc::UnboundedSender<Delivery>,
        events: broadcast::Receiver<RouterEvent>,
        _forwarded: mpsc::UnboundedReceiver<Envelope<String>>,
        _slot: mpsc::Receiver<Envelope<String>>,
        _dispatcher_forward: mpsc::UnboundedSender<Envelope<String>>,
    }

    impl Harness {
        async fn submit(&self, text: &str) -> u64 {
            let (ack, rx) = oneshot::channel();
            let handoff = Handoff {
                message: text.to_string(),
                ack,
            };
            self.inbound.send(handoff).await.unwrap();
            rx.await.unwrap()
        }

        fn report(&self, seq: u64, verdict: Verdict) {
            let outcome = Outcome::Verdict(verdict);
            self.reports.send(Report { seq, outcome }).unwrap();
        }

        fn deliver(&self, seq: u64) {
            self.delivered.send(Delivery { slot: 0, seq }).unwrap();
        }

        async fn until_cleared(&mut self) -> Vec<RouterEvent> {
            let mut seen = Vec::new();
            timeout(Duration::from_secs(1), async {
                loop {
                    let event = self.events.recv().await.unwrap();
                    let done = matches!(event, RouterEvent::Cleared { .. });
                    seen.push(event);
                    if done {
                        return;
                    }
                }
            })
            .await
            .expect("pass never finished");
            seen
        }
    }

    fn spawn_controller() -> Harness {
        let (events, events_rx) = broadcast::channel(64);
        let (inbound, inbound_rx) = mpsc::channel(1);
        let (forward_tx, forwarded) = mpsc::unbounded_channel();
        let (recorded_tx, recorded_rx) = mpsc::unbounded_channel();
        let (pool, pool_handle) = message_pool(inbound_rx, forward_tx, recorded_tx, events.clone());

        let (slot_tx, slot) = mpsc::channel(1);
        let (dispatcher_forward, dispatcher_forward_rx) = mpsc::unbounded_channel();
        let (dispatcher_delivered, _) = mpsc::unbounded_channel();
        let (dispatcher, dispatcher_handle) = dispatcher(
            vec![slot_tx],
            dispatcher_forward_rx,
            dispatcher_delivered,
            events.clone(),
        );

        let (reports, reports_rx) = mpsc::unbounded_channel();
        let (delivered, delivered_rx) = mpsc::unbounded_channel();
        let controller = Controller::new(
            vec![reports_rx],
            delivered_rx,
            recorded_rx,
            pool_handle,
            dispatcher_handle,
            None,
            events,
        );
        tokio::spawn(pool.run());
        tokio::spawn(dispatcher.run());
        tokio::spawn(controller.run());

        Harness {
            inbound,
            reports,
            delivered,
            events: events_rx,
            _forwarded: forwarded,
            _slot: slot,
            _dispatcher_forward: dispatcher_forward,
        }
    }

    #[tokio::test]
    async fn test_report_ahead_of_delivery_notice_does_not_stall_next_pass() {
        let mut h = spawn_controller();

        assert_eq!(h.submit("a").await, 0);
        h.report(0, Verdict::Declined);
        let first = h.until_cleared().await;
        assert!(first.contains(&RouterEvent::PassExhausted));

        // The notice for "a" shows up only after its pass is over.
        h.deliver(0);
        assert_eq!(h.submit("b").await, 1);
        h.deliver(1);
        h.report(1, Verdict::Claimed);

        let second = h.until_cleared().await;
        assert!(second.contains(&RouterEvent::Claimed { slot: 0, seq: 1 }));
        assert_eq!(second.last(), Some(&RouterEvent::Cleared { dropped: 1 }));
    }

    #[tokio::test]
    async fn test_late_notice_within_a_turn_is_not_owed() {
        let mut h = spawn_controller();

        assert_eq!(h.submit("a").await, 0);
        assert_eq!(h.submit("b").await, 1);
        // Both reports overtake their notices; "b" still has to be answered before the hold.
        h.report(0, Verdict::Declined);
        h.deliver(0);
        h.deliver(1);
        h.report(1, Verdict::Declined);

        let observed = h.until_cleared().await;
        assert!(observed.contains(&RouterEvent::Declined { slot: 0, seq: 1 }));
        assert_eq!(observed.last(), Some(&RouterEvent::Cleared { dropped: 2 }));
    }
}
