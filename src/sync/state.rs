//! Room/member/timeline/receipt state, and the pure mutation functions the
//! sync engine drives. `RoomState` is created on first sight in any sync
//! category and destroyed only by an explicit `clear()` on the owning
//! engine — never mutated outside the engine's message-passing boundary.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type RoomId = String;
pub type UserId = String;
pub type EventId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
    Knock,
}

/// One timeline or state event, kept in the shape the homeserver sends it
/// rather than split into N Rust types per `event_type` — only `m.room.*`
/// state events and `m.room.message`/receipts are interpreted; everything
/// else round-trips as an opaque `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stripped state events in `invite_state` carry no event id.
    #[serde(default)]
    pub event_id: EventId,
    pub sender: UserId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub state_key: Option<String>,
    pub content: Value,
    pub origin_server_ts: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberInfo {
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub membership: Option<Membership>,
    pub is_direct: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomSummary {
    pub heroes: Vec<UserId>,
    pub joined_member_count: Option<u32>,
    pub invited_member_count: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: RoomId,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub canonical_alias: Option<String>,
    pub summary: RoomSummary,
    pub unread_notifications: u32,
    pub unread_highlights: u32,
    pub members: HashMap<UserId, MemberInfo>,
    pub timeline: Vec<Event>,
    pub account_data: HashMap<String, Value>,
    pub receipts: HashMap<EventId, HashSet<UserId>>,
    pub prev_batch: Option<String>,
    /// `origin_server_ts` of this room's `m.room.create` event, if seen.
    /// Used to pick the primary DM room among candidates (§3).
    pub created_at: Option<u64>,
    seen_event_ids: HashSet<EventId>,
}

impl RoomState {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            name: None,
            avatar: None,
            canonical_alias: None,
            summary: RoomSummary::default(),
            unread_notifications: 0,
            unread_highlights: 0,
            members: HashMap::new(),
            timeline: Vec::new(),
            account_data: HashMap::new(),
            receipts: HashMap::new(),
            prev_batch: None,
            created_at: None,
            seen_event_ids: HashSet::new(),
        }
    }

    /// Apply one state event (`m.room.name`, `m.room.avatar`,
    /// `m.room.canonical_alias`, `m.room.member`, `m.room.create`).
    /// Returns the affected member's user id when this was a membership
    /// event, so the caller can emit `membership_changed`.
    pub fn apply_state_event(&mut self, event: &Event) -> Option<UserId> {
        match event.event_type.as_str() {
            "m.room.name" => {
                self.name = event
                    .content
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            "m.room.avatar" => {
                self.avatar = event
                    .content
                    .get("url")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            "m.room.canonical_alias" => {
                self.canonical_alias = event
                    .content
                    .get("alias")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            "m.room.create" => {
                self.created_at = Some(event.origin_server_ts);
            }
            "m.room.member" => {
                if let Some(user_id) = event.state_key.clone() {
                    let membership = event
                        .content
                        .get("membership")
                        .and_then(Value::as_str)
                        .and_then(parse_membership);
                    let display_name = event
                        .content
                        .get("displayname")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let avatar = event
                        .content
                        .get("avatar_url")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let is_direct = event
                        .content
                        .get("is_direct")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);

                    self.members.insert(
                        user_id.clone(),
                        MemberInfo {
                            display_name,
                            avatar,
                            membership,
                            is_direct,
                        },
                    );
                    return Some(user_id);
                }
            }
            _ => {}
        }
        None
    }

    /// Push a timeline event, deduplicating by event id. Returns `true` if
    /// it was newly added.
    pub fn push_timeline_event(&mut self, event: Event) -> bool {
        if self.seen_event_ids.contains(&event.event_id) {
            return false;
        }
        self.seen_event_ids.insert(event.event_id.clone());
        self.timeline.push(event);
        true
    }

    /// Insert older events at the front of the timeline (backfill),
    /// skipping duplicates, preserving the order they were returned in.
    pub fn prepend_timeline_events(&mut self, events: Vec<Event>) -> Vec<Event> {
        let mut fresh = Vec::new();
        for event in events {
            if !self.seen_event_ids.contains(&event.event_id) {
                self.seen_event_ids.insert(event.event_id.clone());
                fresh.push(event);
            }
        }
        let mut combined = fresh.clone();
        combined.append(&mut self.timeline);
        self.timeline = combined;
        fresh
    }

    /// Union `user_ids` into `receipts[event_id]`. Monotonic: never removes.
    pub fn apply_receipt(&mut self, event_id: &str, user_ids: impl IntoIterator<Item = UserId>) {
        let entry = self.receipts.entry(event_id.to_string()).or_default();
        for user_id in user_ids {
            entry.insert(user_id);
        }
    }

    pub fn joined_members(&self) -> impl Iterator<Item = (&UserId, &MemberInfo)> {
        self.members
            .iter()
            .filter(|(_, info)| info.membership == Some(Membership::Join))
    }
}

fn parse_membership(raw: &str) -> Option<Membership> {
    match raw {
        "join" => Some(Membership::Join),
        "invite" => Some(Membership::Invite),
        "leave" => Some(Membership::Leave),
        "ban" => Some(Membership::Ban),
        "knock" => Some(Membership::Knock),
        _ => None,
    }
}
