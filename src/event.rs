//! Sensor events: capture, buffering and hand-off to the reactor.
//!
//! Modules never talk to the reactor directly. They hold an [`EventSink`]
//! whose `emit` records the event in the bounded [`EventQueue`] and, for
//! trigger types, forwards it over an unbounded channel. Neither step can
//! block, so `emit` is safe from polling threads and interrupt callbacks.

use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::Local;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Something a module observed, independent of any client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub module: String,
    #[serde(rename = "event")]
    pub kind: String,
    pub data: Value,
    /// Unix time in seconds.
    pub timestamp: f64,
    pub timestamp_iso: String,
}

impl Event {
    pub fn new(module: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        let now = Local::now();
        Self {
            id: Uuid::new_v4(),
            module: module.into(),
            kind: kind.into(),
            data,
            timestamp: now.timestamp_millis() as f64 / 1000.0,
            timestamp_iso: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

/// FIFO ring of the most recent events. The oldest entry is evicted once
/// `capacity` is reached.
#[derive(Debug)]
pub struct EventQueue {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, event: Event) {
        let mut events = self.lock();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Removes and returns everything queued, oldest first.
    pub fn drain(&self) -> Vec<Event> {
        self.lock().drain(..).collect()
    }

    /// Returns everything queued without consuming it.
    pub fn peek(&self) -> Vec<Event> {
        self.lock().iter().cloned().collect()
    }

    pub fn take(&self, peek: bool) -> Vec<Event> {
        if peek { self.peek() } else { self.drain() }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Entry point for every emitted event.
#[derive(Debug)]
pub struct EventHub {
    queue: EventQueue,
    triggers: HashSet<String>,
    reactions: mpsc::UnboundedSender<Event>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
}

impl EventHub {
    pub fn new<I, S>(capacity: usize, triggers: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (reactions, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            queue: EventQueue::new(capacity),
            triggers: triggers.into_iter().map(Into::into).collect(),
            reactions,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Receiving end of trigger events. Only the first caller gets it.
    pub fn take_reactions(&self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn publish(&self, event: Event) {
        info!("[event] {}: {} {}", event.module, event.kind, event.data);
        self.queue.push(event.clone());

        if self.triggers.contains(&event.kind) && self.reactions.send(event).is_err() {
            debug!("Reactor is not running, trigger event only queued");
        }
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Handle a module uses to emit events under its own name.
    pub fn sink(self: &Arc<Self>, module: &'static str) -> EventSink {
        EventSink {
            module,
            hub: Arc::clone(self),
        }
    }
}

/// Module-side upcall into the event pipeline.
#[derive(Debug, Clone)]
pub struct EventSink {
    module: &'static str,
    hub: Arc<EventHub>,
}

impl EventSink {
    pub fn emit(&self, kind: &str, data: Value) {
        self.hub.publish(Event::new(self.module, kind, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn numbered(n: usize) -> Event {
        Event::new("touch", "touched", json!({ "n": n }))
    }

    #[test]
    fn event_serializes_with_wire_names() {
        let event = numbered(1);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["module"], "touch");
        assert_eq!(value["event"], "touched");
        assert_eq!(value["data"], json!({"n": 1}));
        assert!(value["timestamp"].as_f64().unwrap() > 0.0);
        assert_eq!(value["timestamp_iso"].as_str().unwrap().len(), 19);
        assert!(Uuid::parse_str(value["id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn queue_keeps_most_recent_hundred() {
        let queue = EventQueue::new(100);
        for n in 0..150 {
            queue.push(numbered(n));
        }
        let peeked = queue.peek();
        assert_eq!(peeked.len(), 100);
        assert_eq!(peeked[0].data, json!({"n": 50}));
        assert_eq!(peeked[99].data, json!({"n": 149}));
        assert_eq!(queue.len(), 100);

        let drained = queue.drain();
        assert_eq!(drained, peeked);
        assert!(queue.is_empty());
    }

    #[test]
    fn take_switches_between_peek_and_drain() {
        let queue = EventQueue::new(10);
        queue.push(numbered(1));
        assert_eq!(queue.take(true).len(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take(false).len(), 1);
        assert!(queue.take(false).is_empty());
    }

    #[tokio::test]
    async fn only_trigger_events_reach_reactor() {
        let hub = EventHub::new(10, ["touched"]);
        let mut reactions = hub.take_reactions().unwrap();
        assert!(hub.take_reactions().is_none());
        let sink = hub.sink("touch");
        sink.emit("released", json!({}));
        sink.emit("touched", json!({"touch_count": 1}));

        let forwarded = reactions.recv().await.unwrap();
        assert_eq!(forwarded.kind, "touched");
        assert!(reactions.try_recv().is_err());
        assert_eq!(hub.queue().len(), 2);
    }

    #[test]
    fn emit_without_reactor_still_queues() {
        let hub = EventHub::new(10, ["touched"]);
        drop(hub.take_reactions());
        hub.sink("touch").emit("touched", json!({}));
        assert_eq!(hub.queue().len(), 1);
    }

    proptest! {
        #[test]
        fn queue_never_exceeds_capacity(capacity in 1usize..64, pushes in 0usize..200) {
            let queue = EventQueue::new(capacity);
            for n in 0..pushes {
                queue.push(numbered(n));
            }
            let events = queue.peek();
            prop_assert_eq!(events.len(), pushes.min(capacity));
            if let Some(last) = events.last() {
                prop_assert_eq!(&last.data, &json!({ "n": pushes - 1 }));
            }
        }
    }
}
