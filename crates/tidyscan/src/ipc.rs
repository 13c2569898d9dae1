//! Host boundary: command invocation and the pushed event stream

use crate::error::BackendError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;

/// Issues a named command to the worker and returns its JSON response.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value, BackendError>;
}

#[async_trait]
impl<T: Invoker + ?Sized> Invoker for Arc<T> {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value, BackendError> {
        (**self).invoke(command, args).await
    }
}

/// An event pushed by the host on a named channel.
#[derive(Debug, Clone, PartialEq)]
pub struct HostEvent {
    pub channel: String,
    pub payload: Value,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    channels: HashMap<String, Vec<(u64, mpsc::UnboundedSender<HostEvent>)>>,
}

fn lock(inner: &Mutex<BusInner>) -> MutexGuard<'_, BusInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fan-out of host events to every live subscription of a channel.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("EventBus")
            .field("channels", &inner.channels.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route events of `channel` into `sender` until the returned handle is dropped
    pub fn subscribe(&self, channel: &str, sender: mpsc::UnboundedSender<HostEvent>) -> Subscription {
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .push((id, sender));

        Subscription {
            channel: channel.to_string(),
            id,
            bus: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    /// Subscribe with a dedicated receiver
    pub fn listen(&self, channel: &str) -> (Subscription, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.subscribe(channel, tx), rx)
    }

    /// Deliver `payload` to every subscriber of `channel`. Returns the number reached.
    pub fn emit(&self, channel: &str, payload: Value) -> usize {
        let mut inner = lock(&self.inner);
        let Some(subscribers) = inner.channels.get_mut(channel) else {
            return 0;
        };

        let event = HostEvent {
            channel: channel.to_string(),
            payload,
        };
        subscribers.retain(|(_, sender)| sender.send(event.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        lock(&self.inner)
            .channels
            .get(channel)
            .map_or(0, |subscribers| subscribers.len())
    }
}

/// Live registration on an [`EventBus`]. Unsubscribes exactly once, on
/// [`Subscription::unsubscribe`] or on drop.
pub struct Subscription {
    channel: String,
    id: u64,
    bus: Weak<Mutex<BusInner>>,
    active: bool,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        if let Some(bus) = self.bus.upgrade() {
            let mut inner = lock(&bus);
            if let Some(subscribers) = inner.channels.get_mut(&self.channel) {
                subscribers.retain(|(id, _)| *id != self.id);
                if subscribers.is_empty() {
                    inner.channels.remove(&self.channel);
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
