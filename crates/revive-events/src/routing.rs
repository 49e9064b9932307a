//! Event bus routing helpers.

use crate::payloads::{DEFAULT_REPLAY_CAPACITY, EventEnvelope, EventId, RecoveryEvent};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::sync::broadcast::Sender;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    replay: Arc<Mutex<VecDeque<EventEnvelope>>>,
    replay_capacity: usize,
    next_id: Arc<Mutex<EventId>>,
}

impl EventBus {
    /// Construct a bus with a custom replay capacity (clamped to at least one).
    #[must_use]
    pub fn with_capacity(replay_capacity: usize) -> Self {
        let replay_capacity = replay_capacity.max(1);
        let (sender, _) = broadcast::channel(replay_capacity);
        Self {
            sender,
            replay: Arc::new(Mutex::new(VecDeque::with_capacity(replay_capacity))),
            replay_capacity,
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Construct a bus with the default replay capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Subscribe to the bus, replaying buffered events newer than `last_event_id`.
    #[must_use]
    pub fn subscribe(&self, last_event_id: Option<EventId>) -> EventStream {
        let receiver = self.sender.subscribe();
        let backlog = last_event_id
            .map(|last| self.backlog_since(last))
            .unwrap_or_default();
        let replayed_through = backlog.last().map(|env| env.id);
        EventStream {
            backlog: backlog.into(),
            replayed_through,
            live: BroadcastStream::new(receiver),
        }
    }

    /// Publish a new event to all subscribers.
    pub fn send(&self, event: RecoveryEvent) -> EventId {
        let mut next = self
            .next_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = *next;
        *next = next.saturating_add(1);
        drop(next);

        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        {
            let mut replay = self.lock_replay();
            if replay.len() == self.replay_capacity {
                let _ = replay.pop_front();
            }
            replay.push_back(envelope.clone());
        }
        let _ = self.sender.send(envelope);
        id
    }

    /// Publish and return the assigned event id.
    #[must_use]
    pub fn publish(&self, event: RecoveryEvent) -> EventId {
        self.send(event)
    }

    /// Last event id observed in the replay buffer.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_replay().back().map(|env| env.id)
    }

    /// Collect a backlog of events emitted after the specified id.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        let replay = self.lock_replay();
        replay.iter().filter(|env| env.id > id).cloned().collect()
    }

    fn lock_replay(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.replay
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields replayed events first, then live events.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    replayed_through: Option<EventId>,
    live: BroadcastStream<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event. Lagged receivers skip ahead rather than fail;
    /// `None` means the bus was dropped.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        while let Some(item) = self.live.next().await {
            let Ok(envelope) = item else {
                continue;
            };
            if self
                .replayed_through
                .is_some_and(|through| envelope.id <= through)
            {
                continue;
            }
            return Some(envelope);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revive_torrent_core::TorrentId;

    fn drive_event(id: &str) -> RecoveryEvent {
        RecoveryEvent::DriveDetected {
            torrent_id: TorrentId::from(id),
            path: format!("/mnt/{id}"),
        }
    }

    #[tokio::test]
    async fn publish_and_replay_from_id() {
        let bus = EventBus::with_capacity(4);
        let first = bus.publish(drive_event("a"));
        let second = bus.publish(drive_event("b"));

        assert_eq!(bus.last_event_id(), Some(second));
        let backlog = bus.backlog_since(first);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, second);
    }

    #[tokio::test]
    async fn replay_ring_drops_oldest_events() {
        let bus = EventBus::with_capacity(2);
        for name in ["a", "b", "c"] {
            let _ = bus.publish(drive_event(name));
        }
        let backlog = bus.backlog_since(0);
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].id, 2);
    }

    #[tokio::test]
    async fn subscribe_replays_backlog_before_live_events() {
        let bus = EventBus::new();
        let first = bus.publish(drive_event("a"));
        let second = bus.publish(drive_event("b"));
        let mut stream = bus.subscribe(Some(first));
        let third = bus.publish(drive_event("c"));

        let replayed = stream.next().await.expect("replayed event");
        assert_eq!(replayed.id, second);
        let live = stream.next().await.expect("live event");
        assert_eq!(live.id, third);
    }
}
