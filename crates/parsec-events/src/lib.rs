//! Per-organization in-process event bus (spec.md §4.7).
//!
//! Built on `tokio::sync::broadcast`, the same primitive the surface layer
//! uses for its market-data fan-out, scoped one channel per organization so
//! an SSE subscriber only ever sees events for the org it authenticated
//! against. A bounded replay buffer backs `Last-Event-ID` resume; once an
//! event falls out of that buffer a subscriber is told to resync instead of
//! silently missing it.

pub mod event;

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use parsec_types::{EventId, OrganizationId};
use tokio::sync::broadcast;

pub use event::Event;

/// Default number of events kept per organization for `Last-Event-ID`
/// replay, used by [`EventBus::new`]. Chosen generously relative to the
/// broadcast channel capacity below so a slow-but-connected subscriber
/// rarely needs a full resync. `services/parsec-server` may override this
/// via [`EventBus::with_capacity`] (spec.md §2 Configuration: SSE
/// replay-buffer size).
const DEFAULT_REPLAY_BUFFER_SIZE: usize = 1024;

/// Broadcast channel capacity. A lagging receiver that falls behind by more
/// than this many events receives `RecvError::Lagged` and must resync via
/// `Last-Event-ID`, exactly like falling out of the replay buffer.
const CHANNEL_CAPACITY: usize = 1024;

struct OrgBus {
    sender: broadcast::Sender<Event>,
    replay: Mutex<VecDeque<Event>>,
    replay_capacity: usize,
}

impl OrgBus {
    fn new(replay_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            replay: Mutex::new(VecDeque::with_capacity(replay_capacity)),
            replay_capacity,
        }
    }
}

/// The process-wide event bus, one [`OrgBus`] per organization, created
/// lazily on first publish or subscribe.
#[derive(Clone)]
pub struct EventBus {
    orgs: Arc<DashMap<OrganizationId, Arc<OrgBus>>>,
    replay_capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// What a `Last-Event-ID` resume request resolves to.
pub enum Replay {
    /// Every event strictly after `after` that is still in the buffer, in
    /// order. Empty if `after` is the most recent event.
    Events(Vec<Event>),
    /// `after` (or something before it) has already been evicted from the
    /// replay buffer: the client must resync certificates from scratch.
    MissedEvents,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_BUFFER_SIZE)
    }

    /// Same as [`EventBus::new`], but with a caller-chosen replay-buffer
    /// size per organization (spec.md §2 Configuration).
    pub fn with_capacity(replay_capacity: usize) -> Self {
        Self { orgs: Arc::new(DashMap::new()), replay_capacity }
    }

    fn org_bus(&self, org: &OrganizationId) -> Arc<OrgBus> {
        self.orgs
            .entry(org.clone())
            .or_insert_with(|| Arc::new(OrgBus::new(self.replay_capacity)))
            .clone()
    }

    /// Publish an event. Never blocks beyond buffering it in the channel and
    /// the replay deque (spec.md §4.7: "a send suspends at most until the
    /// event is buffered in the bus").
    pub fn publish(&self, org: &OrganizationId, event: Event) {
        let bus = self.org_bus(org);
        {
            let mut replay = bus.replay.lock();
            if replay.len() == bus.replay_capacity {
                replay.pop_front();
            }
            replay.push_back(event.clone());
        }
        // No receivers is not an error: nobody is subscribed yet.
        let _ = bus.sender.send(event);
    }

    /// Subscribe to live events for an organization, from this point on.
    pub fn subscribe(&self, org: &OrganizationId) -> broadcast::Receiver<Event> {
        self.org_bus(org).sender.subscribe()
    }

    /// Resolve a `Last-Event-ID` header into replay events, or a
    /// `MissedEvents` marker if that event has aged out of the buffer.
    pub fn replay_since(&self, org: &OrganizationId, last_event_id: EventId) -> Replay {
        let bus = self.org_bus(org);
        let replay = bus.replay.lock();
        match replay.iter().position(|e| e.event_id() == last_event_id) {
            Some(idx) => Replay::Events(replay.iter().skip(idx + 1).cloned().collect()),
            None => Replay::MissedEvents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event::EventPayload;
    use parsec_types::{RealmId, Timestamp};

    fn org() -> OrganizationId {
        OrganizationId::parse("TestOrg").unwrap()
    }

    fn pinged() -> Event {
        Event::new(org(), EventPayload::Pinged)
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(&org());
        let event = pinged();
        bus.publish(&org(), event.clone());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_id(), event.event_id());
    }

    #[tokio::test]
    async fn events_for_other_organizations_are_not_delivered() {
        let bus = EventBus::new();
        let other = OrganizationId::parse("OtherOrg").unwrap();
        let mut rx = bus.subscribe(&other);
        bus.publish(&org(), pinged());
        bus.publish(&other, pinged());
        let received = rx.recv().await.unwrap();
        assert!(matches!(received.payload(), EventPayload::Pinged));
    }

    #[test]
    fn replay_since_returns_events_strictly_after_the_given_id() {
        let bus = EventBus::new();
        let e1 = pinged();
        let e2 = pinged();
        let e3 = pinged();
        bus.publish(&org(), e1.clone());
        bus.publish(&org(), e2.clone());
        bus.publish(&org(), e3.clone());

        match bus.replay_since(&org(), e1.event_id()) {
            Replay::Events(events) => {
                assert_eq!(events.len(), 2);
                assert_eq!(events[0].event_id(), e2.event_id());
                assert_eq!(events[1].event_id(), e3.event_id());
            }
            Replay::MissedEvents => panic!("expected replay events"),
        }
    }

    #[test]
    fn replay_since_unknown_event_id_reports_missed_events() {
        let bus = EventBus::new();
        bus.publish(&org(), pinged());
        let unknown = parsec_types::EventId::new();
        assert!(matches!(bus.replay_since(&org(), unknown), Replay::MissedEvents));
    }

    #[test]
    fn vlob_event_blob_is_dropped_past_the_size_threshold() {
        let big_blob = vec![0u8; 10];
        let small_blob = vec![0u8; 2];
        let realm_id = RealmId::new();
        let vlob_id = parsec_types::VlobId::new();
        let author = parsec_types::DeviceId::new(parsec_types::UserId::new(), "dev1");

        let small = event::vlob_event_payload(
            realm_id,
            vlob_id,
            1,
            author.clone(),
            Timestamp::now(),
            small_blob.clone(),
            Timestamp::now(),
            Timestamp::now(),
            5,
        );
        let big = event::vlob_event_payload(
            realm_id, vlob_id, 1, author, Timestamp::now(), big_blob, Timestamp::now(),
            Timestamp::now(), 5,
        );

        match small {
            EventPayload::Vlob { blob, .. } => assert_eq!(blob, Some(small_blob)),
            _ => panic!("expected vlob event"),
        }
        match big {
            EventPayload::Vlob { blob, .. } => assert_eq!(blob, None),
            _ => panic!("expected vlob event"),
        }
    }
}
