//! # Topic router
//!
//! Routes a serial stream of messages to an ordered list of [`Topic`]s. The first topic that
//! claims a message owns that turn of the conversation. A topic that declines steps aside and
//! the next one is offered every message pooled since the last claim, in arrival order.
//!
//! Internally the router is a handful of tasks that only talk through channels: one slot per
//! topic, the message pool, the dispatcher that owns the active destination, and the
//! controller that runs the claim/replay/clear protocol.

mod controller;
mod dispatcher;
mod event;
mod pool;
mod slot;

use std::time::Duration;

use chatroom_core::config::DEFAULT_OUTBOUND_CAPACITY;
use chatroom_core::{Outbox, Result, RouterConfig, RouterError, Topic};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

pub use event::RouterEvent;

use controller::Controller;
use dispatcher::dispatcher;
use pool::{message_pool, Handoff};
use slot::TopicSlot;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Producer handle. Each send is a hand-off: it returns only after the pool has recorded
/// the message, so a producer waits while the pool is held between turns.
pub struct Inbound<In> {
    tx: mpsc::Sender<Handoff<In>>,
}

impl<In> Clone for Inbound<In> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<In: Send> Inbound<In> {
    /// Returns the sequence number the pool gave the message.
    pub async fn send(&self, message: In) -> Result<u64> {
        let (ack, recorded) = oneshot::channel();
        self.tx
            .send(Handoff { message, ack })
            .await
            .map_err(|_| RouterError::InboundClosed)?;
        recorded.await.map_err(|_| RouterError::InboundClosed)
    }
}

/// Ordered topic list plus router settings. Topics added first are offered messages first.
pub struct RouterBuilder<In, Out> {
    topics: Vec<Box<dyn Topic<In, Out>>>,
    verdict_timeout: Option<Duration>,
    outbound_capacity: usize,
    event_capacity: usize,
}

impl<In, Out> Default for RouterBuilder<In, Out> {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            verdict_timeout: None,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl<In, Out> RouterBuilder<In, Out>
where
    In: Send + Sync + 'static,
    Out: Send + 'static,
{
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            verdict_timeout: config.verdict_timeout,
            outbound_capacity: config.outbound_capacity,
            ..Self::default()
        }
    }

    /// Appends a topic with the lowest priority so far.
    pub fn topic<T: Topic<In, Out>>(mut self, topic: T) -> Self {
        self.topics.push(Box::new(topic));
        self
    }

    pub fn boxed_topic(mut self, topic: Box<dyn Topic<In, Out>>) -> Self {
        self.topics.push(topic);
        self
    }

    /// Bounds the wait for each verdict; an expired wait counts as a decline.
    pub fn verdict_timeout(mut self, timeout: Duration) -> Self {
        self.verdict_timeout = Some(timeout);
        self
    }

    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Spawns the router tasks on the current tokio runtime.
    pub fn build(self) -> Router<In, Out> {
        let (events, _) = broadcast::channel(self.event_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_capacity.max(1));
        let (forward_tx, forward_rx) = mpsc::unbounded_channel();
        let (delivered_tx, delivered_rx) = mpsc::unbounded_channel();
        let (recorded_tx, recorded_rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(outbound_tx);

        let mut tasks = Vec::with_capacity(self.topics.len() + 3);
        let mut names = Vec::with_capacity(self.topics.len());
        let mut inboxes = Vec::with_capacity(self.topics.len());
        let mut reports = Vec::with_capacity(self.topics.len());
        for (index, topic) in self.topics.into_iter().enumerate() {
            let (inbox_tx, inbox_rx) = mpsc::channel(1);
            let (report_tx, report_rx) = mpsc::unbounded_channel();
            names.push(topic.name().to_string());
            let slot = TopicSlot::new(index, topic, inbox_rx, outbox.clone(), report_tx);
            tasks.push(tokio::spawn(slot.run()));
            inboxes.push(inbox_tx);
            reports.push(report_rx);
        }

        let (pool, pool_handle) = message_pool(inbound_rx, forward_tx, recorded_tx, events.clone());
        let (dispatcher, dispatcher_handle) =
            dispatcher(inboxes, forward_rx, delivered_tx, events.clone());
        let controller = Controller::new(
            reports,
            delivered_rx,
            recorded_rx,
            pool_handle,
            dispatcher_handle,
            self.verdict_timeout,
            events.clone(),
        );
        tasks.push(tokio::spawn(pool.run()));
        tasks.push(tokio::spawn(dispatcher.run()));
        tasks.push(tokio::spawn(controller.run()));

        info!(
            topics = ?names,
            verdict_timeout_ms = ?self.verdict_timeout.map(|d| d.as_millis()),
            "router started"
        );

        Router {
            inbound: Inbound { tx: inbound_tx },
            outbound: Some(outbound_rx),
            events,
            topic_names: names,
            tasks,
        }
    }
}

/// A running router. Dropping it stops every router task.
pub struct Router<In, Out> {
    inbound: Inbound<In>,
    outbound: Option<mpsc::Receiver<Out>>,
    events: broadcast::Sender<RouterEvent>,
    topic_names: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl<In, Out> Router<In, Out>
where
    In: Send + Sync + 'static,
    Out: Send + 'static,
{
    pub fn builder() -> RouterBuilder<In, Out> {
        RouterBuilder::default()
    }

    /// Builds a router from topics in priority order.
    pub fn new(topics: Vec<Box<dyn Topic<In, Out>>>, config: &RouterConfig) -> Self {
        topics
            .into_iter()
            .fold(RouterBuilder::from_config(config), RouterBuilder::boxed_topic)
            .build()
    }

    /// Hands `message` to the pool; see [`Inbound::send`].
    pub async fn send(&self, message: In) -> Result<u64> {
        self.inbound.send(message).await
    }

    pub fn sender(&self) -> Inbound<In> {
        self.inbound.clone()
    }

    /// Next reply from any topic; `None` once the outbound receiver was taken or closed.
    pub async fn recv(&mut self) -> Option<Out> {
        match self.outbound.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    pub fn take_outbound(&mut self) -> Option<mpsc::Receiver<Out>> {
        self.outbound.take()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    pub fn topic_names(&self) -> &[String] {
        &self.topic_names
    }

    pub fn shutdown(self) {
        drop(self);
    }
}

impl<In, Out> Drop for Router<In, Out> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
