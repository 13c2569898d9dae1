//! Event correlation: idempotent channel subscriptions and session-id filtering

use crate::ipc::{EventBus, HostEvent, Subscription};
use crate::model::SessionId;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::debug;

/// How many superseded session ids are remembered for stale-event rejection
const RETIRED_CAPACITY: usize = 16;

/// Per-controller set of channel subscriptions feeding a single queue.
///
/// Subscribing to a channel that is already subscribed tears the previous
/// registration down first, so a channel never has more than one live
/// subscription owned by the same `Listeners`.
pub struct Listeners {
    bus: EventBus,
    tx: mpsc::UnboundedSender<HostEvent>,
    rx: mpsc::UnboundedReceiver<HostEvent>,
    subscriptions: HashMap<String, Subscription>,
}

impl Listeners {
    pub fn new(bus: EventBus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            bus,
            tx,
            rx,
            subscriptions: HashMap::new(),
        }
    }

    pub fn subscribe(&mut self, channel: &str) {
        if let Some(previous) = self.subscriptions.remove(channel) {
            debug!("Replacing existing subscription on {}", channel);
            previous.unsubscribe();
        }
        let subscription = self.bus.subscribe(channel, self.tx.clone());
        self.subscriptions.insert(channel.to_string(), subscription);
    }

    pub fn is_listening(&self, channel: &str) -> bool {
        self.subscriptions.contains_key(channel)
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn try_next(&mut self) -> Option<HostEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now, in arrival order
    pub fn drain(&mut self) -> Vec<HostEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Wait for the next event. Returns `None` when nothing is subscribed.
    pub async fn recv(&mut self) -> Option<HostEvent> {
        if self.subscriptions.is_empty() {
            return None;
        }
        // `tx` is held by self, so the channel never closes underneath us
        self.rx.recv().await
    }

    /// Drop every subscription and discard anything still queued
    pub fn clear(&mut self) {
        for (_, subscription) in self.subscriptions.drain() {
            subscription.unsubscribe();
        }
        while self.try_next().is_some() {}
    }
}

/// Outcome of checking an event's session id against the tracked session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// No id was assigned yet; the event's id becomes the current one
    Adopt(SessionId),
    Stale,
    /// The session already produced its terminal event
    AfterTerminal,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accept | Verdict::Adopt(_))
    }
}

/// Decides which session an incoming event belongs to.
#[derive(Debug, Default)]
pub struct SessionFilter {
    current: Option<SessionId>,
    retired: VecDeque<SessionId>,
    terminal: bool,
    /// A session is being tracked, acknowledged or not
    armed: bool,
}

impl SessionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&SessionId> {
        self.current.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Start tracking a new, not yet acknowledged session. The previous id is retired.
    pub fn begin(&mut self) {
        self.retire_current();
        self.terminal = false;
        self.armed = true;
    }

    /// Record the id the worker returned for the session begun last.
    ///
    /// If an adopted event already set a different id, that id is retired.
    pub fn assign(&mut self, id: SessionId) {
        match &self.current {
            Some(current) if *current == id => {}
            Some(_) => {
                self.retire_current();
                self.current = Some(id);
            }
            None => self.current = Some(id),
        }
        self.armed = true;
    }

    pub fn retire_current(&mut self) {
        if let Some(id) = self.current.take() {
            self.retire(id);
        }
    }

    pub fn retire(&mut self, id: SessionId) {
        if self.retired.contains(&id) {
            return;
        }
        if self.retired.len() == RETIRED_CAPACITY {
            self.retired.pop_front();
        }
        self.retired.push_back(id);
    }

    pub fn is_retired(&self, id: &SessionId) -> bool {
        self.retired.contains(id)
    }

    pub fn check(&mut self, id: &SessionId) -> Verdict {
        match &self.current {
            Some(current) if current == id => {
                if self.terminal {
                    Verdict::AfterTerminal
                } else {
                    Verdict::Accept
                }
            }
            Some(_) => Verdict::Stale,
            None if !self.armed || self.is_retired(id) => Verdict::Stale,
            None => {
                self.current = Some(id.clone());
                Verdict::Adopt(id.clone())
            }
        }
    }

    /// Drop an adopted id that belonged to some other session. The filter stays
    /// armed, so the next unknown id is adopted again.
    pub fn forget_adopted(&mut self) {
        self.retire_current();
        self.terminal = false;
    }

    pub fn mark_terminal(&mut self) {
        self.terminal = true;
    }

    /// Stop tracking; every later event is stale until `begin` is called
    pub fn disarm(&mut self) {
        self.retire_current();
        self.armed = false;
    }

    pub fn reset(&mut self) {
        self.disarm();
        self.terminal = false;
    }
}
