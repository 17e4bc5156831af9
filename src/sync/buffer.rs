//! Pre-classification event buffer: timeline events for a room whose DM
//! status isn't known yet are held here until classification resolves,
//! then drained to the normal handler in arrival order (§4.5, §7
//! "Capacity").

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::state::{Event, RoomId};

pub const DEFAULT_CAPACITY_PER_ROOM: usize = 100;
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(10);

struct BufferedEvent {
    event: Event,
    buffered_at: Instant,
}

/// Per-room bounded queue of events arrived before DM classification.
pub struct EventBuffer {
    capacity_per_room: usize,
    max_age: Duration,
    rooms: HashMap<RoomId, VecDeque<BufferedEvent>>,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_PER_ROOM, DEFAULT_MAX_AGE)
    }
}

impl EventBuffer {
    pub fn new(capacity_per_room: usize, max_age: Duration) -> Self {
        Self {
            capacity_per_room,
            max_age,
            rooms: HashMap::new(),
        }
    }

    /// Buffer `event` for `room_id`. Returns `false` (caller should log a
    /// warning and drop the event) if the room's buffer is already full.
    pub fn push(&mut self, room_id: &str, event: Event) -> bool {
        let queue = self.rooms.entry(room_id.to_string()).or_default();
        if queue.len() >= self.capacity_per_room {
            return false;
        }
        queue.push_back(BufferedEvent {
            event,
            buffered_at: Instant::now(),
        });
        true
    }

    pub fn has_buffered(&self, room_id: &str) -> bool {
        self.rooms.get(room_id).map(|q| !q.is_empty()).unwrap_or(false)
    }

    pub fn buffered_room_ids(&self) -> Vec<RoomId> {
        self.rooms.keys().cloned().collect()
    }

    /// Drain all buffered events for `room_id`, in arrival order, clearing
    /// the room from the buffer.
    pub fn drain(&mut self, room_id: &str) -> Vec<Event> {
        self.rooms
            .remove(room_id)
            .map(|queue| queue.into_iter().map(|b| b.event).collect())
            .unwrap_or_default()
    }

    /// Evict events older than `max_age`. Returns the number evicted.
    pub fn prune(&mut self) -> usize {
        let mut evicted = 0;
        let now = Instant::now();
        self.rooms.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|b| now.duration_since(b.buffered_at) < self.max_age);
            evicted += before - queue.len();
            !queue.is_empty()
        });
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> Event {
        Event {
            event_id: id.to_string(),
            sender: "@a:x".to_string(),
            event_type: "m.room.message".to_string(),
            state_key: None,
            content: serde_json::json!({}),
            origin_server_ts: 0,
        }
    }

    #[test]
    fn drains_in_arrival_order() {
        let mut buffer = EventBuffer::default();
        buffer.push("!r:x", event("$1"));
        buffer.push("!r:x", event("$2"));
        buffer.push("!r:x", event("$3"));
        let drained = buffer.drain("!r:x");
        assert_eq!(
            drained.iter().map(|e| e.event_id.clone()).collect::<Vec<_>>(),
            vec!["$1", "$2", "$3"]
        );
        assert!(!buffer.has_buffered("!r:x"));
    }

    #[test]
    fn capacity_overflow_refuses_new_events() {
        let mut buffer = EventBuffer::new(2, DEFAULT_MAX_AGE);
        assert!(buffer.push("!r:x", event("$1")));
        assert!(buffer.push("!r:x", event("$2")));
        assert!(!buffer.push("!r:x", event("$3")));
        assert_eq!(buffer.drain("!r:x").len(), 2);
    }

    #[test]
    fn prune_evicts_events_older_than_max_age() {
        let mut buffer = EventBuffer::new(100, Duration::from_millis(5));
        buffer.push("!r:x", event("$1"));
        std::thread::sleep(Duration::from_millis(20));
        let evicted = buffer.prune();
        assert_eq!(evicted, 1);
        assert!(!buffer.has_buffered("!r:x"));
    }
}
