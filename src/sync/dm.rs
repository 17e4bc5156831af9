//! DM-room classification and the direct-message room cache, kept
//! co-located with the rest of the sync state so consistency is a local
//! invariant rather than a cross-task contract (§9).

use std::collections::HashMap;

use super::rpc::{CreateRoomRequest, HomeserverApi, RpcResult};
use super::state::{Membership, RoomId, RoomState, UserId};

/// `true` iff `room` should be treated as a direct-message conversation
/// with `own_user_id`, using the (a) explicit `is_direct` flag on our own
/// member event, falling back to (b) the two-joined-parties + is-direct-flag
/// heuristic when `m.direct` has not classified the room yet (§3, §9).
pub fn is_dm_room(room: &RoomState, own_user_id: &str) -> bool {
    if let Some(own) = room.members.get(own_user_id) {
        if own.is_direct {
            return true;
        }
    }

    let joined: Vec<&UserId> = room
        .joined_members()
        .map(|(user_id, _)| user_id)
        .collect();
    if joined.len() != 2 || !joined.iter().any(|&u| u == own_user_id) {
        return false;
    }

    room.members.values().any(|m| m.is_direct)
}

#[derive(Debug, Clone, Default)]
pub struct DmRoomService {
    primary_room_by_contact: HashMap<UserId, RoomId>,
    all_rooms_by_contact: HashMap<UserId, Vec<RoomId>>,
    contact_by_room: HashMap<RoomId, UserId>,
}

impl DmRoomService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primary_room(&self, contact: &str) -> Option<&RoomId> {
        self.primary_room_by_contact.get(contact)
    }

    pub fn contact_for_room(&self, room_id: &str) -> Option<&UserId> {
        self.contact_by_room.get(room_id)
    }

    pub fn all_rooms(&self, contact: &str) -> &[RoomId] {
        self.all_rooms_by_contact
            .get(contact)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Apply a fresh `m.direct` account-data payload: `{contact: [room_id, ...]}`.
    /// For each contact, store every listed room id, set the reverse lookup,
    /// and pick the primary by oldest `m.room.create` timestamp (tie-break:
    /// lexicographically smallest room id).
    pub fn apply_direct_account_data(
        &mut self,
        direct: &HashMap<UserId, Vec<RoomId>>,
        rooms: &HashMap<RoomId, RoomState>,
    ) {
        self.primary_room_by_contact.clear();
        self.all_rooms_by_contact.clear();
        self.contact_by_room.clear();

        for (contact, room_ids) in direct {
            self.all_rooms_by_contact
                .insert(contact.clone(), room_ids.clone());
            for room_id in room_ids {
                self.contact_by_room
                    .insert(room_id.clone(), contact.clone());
            }

            if let Some(primary) = pick_primary(room_ids, rooms) {
                self.primary_room_by_contact
                    .insert(contact.clone(), primary);
            }
        }
    }

    /// Ensure a DM room with `contact` exists, in priority order:
    /// 1. a cached room we're still joined to;
    /// 2. an existing two-party room already flagged `is_direct`;
    /// 3. a freshly created trusted-private room.
    ///
    /// On paths 2 and 3 this updates `m.direct` on the homeserver and the
    /// local cache before returning.
    pub async fn ensure_dm_room(
        &mut self,
        api: &dyn HomeserverApi,
        own_user_id: &str,
        contact: &str,
        rooms: &HashMap<RoomId, RoomState>,
    ) -> RpcResult<RoomId> {
        if let Some(cached) = self.primary_room_by_contact.get(contact) {
            if let Some(room) = rooms.get(cached) {
                if room
                    .members
                    .get(own_user_id)
                    .map(|m| m.membership == Some(Membership::Join))
                    .unwrap_or(false)
                {
                    return Ok(cached.clone());
                }
            }
        }

        if let Some(room_id) = self.find_candidate_room(own_user_id, contact, rooms) {
            self.record_direct_room(api, own_user_id, contact, &room_id)
                .await?;
            return Ok(room_id);
        }

        let room_id = api
            .create_room(CreateRoomRequest {
                is_direct: true,
                invite: vec![contact.to_string()],
                preset: "trusted_private_chat".to_string(),
                visibility: "private".to_string(),
                name: None,
                alias: None,
            })
            .await?;
        self.record_direct_room(api, own_user_id, contact, &room_id)
            .await?;
        Ok(room_id)
    }

    fn find_candidate_room(
        &self,
        own_user_id: &str,
        contact: &str,
        rooms: &HashMap<RoomId, RoomState>,
    ) -> Option<RoomId> {
        let mut candidates: Vec<(u64, RoomId)> = rooms
            .values()
            .filter(|room| {
                let own_joined = room
                    .members
                    .get(own_user_id)
                    .map(|m| m.membership == Some(Membership::Join))
                    .unwrap_or(false);
                let contact_joined = room
                    .members
                    .get(contact)
                    .map(|m| m.membership == Some(Membership::Join))
                    .unwrap_or(false);
                let joined_count = room.joined_members().count();
                let has_is_direct_flag = room.members.values().any(|m| m.is_direct);
                own_joined && contact_joined && joined_count == 2 && has_is_direct_flag
            })
            .map(|room| (room.created_at.unwrap_or(u64::MAX), room.room_id.clone()))
            .collect();

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        candidates.into_iter().next().map(|(_, room_id)| room_id)
    }

    async fn record_direct_room(
        &mut self,
        api: &dyn HomeserverApi,
        own_user_id: &str,
        contact: &str,
        room_id: &str,
    ) -> RpcResult<()> {
        let mut entry = self
            .all_rooms_by_contact
            .get(contact)
            .cloned()
            .unwrap_or_default();
        if !entry.iter().any(|r| r == room_id) {
            entry.push(room_id.to_string());
        }
        self.all_rooms_by_contact
            .insert(contact.to_string(), entry.clone());
        self.primary_room_by_contact
            .insert(contact.to_string(), room_id.to_string());
        self.contact_by_room
            .insert(room_id.to_string(), contact.to_string());

        let direct_value = serde_json::to_value(&self.all_rooms_by_contact)
            .map_err(|e| super::rpc::RpcError::new(e.to_string()))?;
        api.set_account_data(own_user_id, "m.direct", direct_value)
            .await
    }
}

fn pick_primary(room_ids: &[RoomId], rooms: &HashMap<RoomId, RoomState>) -> Option<RoomId> {
    room_ids
        .iter()
        .map(|id| {
            let ts = rooms.get(id).and_then(|r| r.created_at).unwrap_or(u64::MAX);
            (ts, id.clone())
        })
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::state::Event;

    fn room_with_members(room_id: &str, created_at: u64, members: &[(&str, bool)]) -> RoomState {
        let mut room = RoomState::new(room_id.to_string());
        room.created_at = Some(created_at);
        for &(user_id, is_direct) in members {
            room.apply_state_event(&Event {
                event_id: format!("$m-{user_id}-{room_id}"),
                sender: user_id.to_string(),
                event_type: "m.room.member".to_string(),
                state_key: Some(user_id.to_string()),
                content: serde_json::json!({"membership": "join", "is_direct": is_direct}),
                origin_server_ts: created_at,
            });
        }
        room
    }

    #[test]
    fn own_is_direct_flag_classifies_room() {
        let room = room_with_members("!r:x", 10, &[("@me:x", true), ("@them:x", false)]);
        assert!(is_dm_room(&room, "@me:x"));
    }

    #[test]
    fn two_joined_plus_flag_fallback_classifies() {
        let room = room_with_members("!r:x", 10, &[("@me:x", false), ("@them:x", true)]);
        assert!(is_dm_room(&room, "@me:x"));
    }

    #[test]
    fn group_room_is_not_dm() {
        let room = room_with_members(
            "!r:x",
            10,
            &[("@me:x", false), ("@a:x", false), ("@b:x", true)],
        );
        assert!(!is_dm_room(&room, "@me:x"));
    }

    #[test]
    fn primary_picks_oldest_then_lexicographic() {
        let mut rooms = HashMap::new();
        rooms.insert("!b:x".to_string(), room_with_members("!b:x", 5, &[]));
        rooms.insert("!a:x".to_string(), room_with_members("!a:x", 5, &[]));
        rooms.insert("!c:x".to_string(), room_with_members("!c:x", 1, &[]));

        let mut dm = DmRoomService::new();
        let mut direct = HashMap::new();
        direct.insert(
            "@contact:x".to_string(),
            vec!["!a:x".to_string(), "!b:x".to_string(), "!c:x".to_string()],
        );
        dm.apply_direct_account_data(&direct, &rooms);

        assert_eq!(dm.primary_room("@contact:x"), Some(&"!c:x".to_string()));
    }
}
