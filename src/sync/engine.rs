//! The sync engine: a single cooperative task that issues one long-poll at
//! a time, mutates `RoomState` as the sole owner, and emits typed events to
//! subscribers (§4.5, §5).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, Mutex};

use crate::error::SyncError;

use super::buffer::{EventBuffer, PRUNE_INTERVAL};
use super::dm::{self, DmRoomService};
use super::rpc::{Direction, HomeserverApi, RpcError, SyncRequest};
use super::state::{Event, RoomId, RoomState, UserId};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const INITIAL_RETRY: Duration = Duration::from_secs(1);
const MAX_RETRY: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const UNKNOWN_TOKEN_ERRCODE: &str = "M_UNKNOWN_TOKEN";

/// Invoked when the homeserver rejects the access token. Returns the new
/// token to keep the loop running, or `None` to mark the session offline
/// (§7 "Authorization lost").
pub type TokenRefreshCallback =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Option<String>> + Send>> + Send + Sync>;

/// Everything the sync engine can emit. Subscribers get their own
/// `broadcast::Receiver`; dropping it is the cancellation handle (§9
/// "Callbacks and event emitters").
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Synced { next_batch: String },
    Error { message: String },
    Offline,
    AccountDataUpdated { event_type: String, content: serde_json::Value },
    TimelineEvent { room_id: RoomId, event: Event },
    MembershipChanged { room_id: RoomId, user_id: UserId },
    ReceiptUpdated { room_id: RoomId, event_id: String },
    RoomUpdated { room_id: RoomId },
}

struct EngineState {
    user_id: Option<UserId>,
    rooms: HashMap<RoomId, RoomState>,
    next_batch: Option<String>,
    dm: DmRoomService,
    buffer: EventBuffer,
}

pub struct SyncEngine {
    api: Arc<dyn HomeserverApi>,
    state: Mutex<EngineState>,
    running: Arc<AtomicBool>,
    events_tx: broadcast::Sender<SyncEvent>,
    timeout: Duration,
    token_refresh: Mutex<Option<TokenRefreshCallback>>,
    offline: AtomicBool,
}

impl SyncEngine {
    pub fn new(api: Arc<dyn HomeserverApi>) -> Self {
        Self::with_timeout(api, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(api: Arc<dyn HomeserverApi>, timeout: Duration) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            state: Mutex::new(EngineState {
                user_id: None,
                rooms: HashMap::new(),
                next_batch: None,
                dm: DmRoomService::new(),
                buffer: EventBuffer::default(),
            }),
            running: Arc::new(AtomicBool::new(false)),
            events_tx,
            timeout,
            token_refresh: Mutex::new(None),
            offline: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    /// Register a callback invoked when the homeserver rejects the access
    /// token. If it resolves to `Some(token)`, the caller is expected to
    /// apply that token to its `HomeserverApi` implementation and the loop
    /// continues; `None` marks the session offline.
    pub async fn set_token_refresh_callback(&self, callback: TokenRefreshCallback) {
        *self.token_refresh.lock().await = Some(callback);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    pub async fn set_user_id(&self, user_id: impl Into<String>) {
        self.state.lock().await.user_id = Some(user_id.into());
    }

    pub async fn get_next_batch(&self) -> Option<String> {
        self.state.lock().await.next_batch.clone()
    }

    pub async fn get_room(&self, room_id: &str) -> Option<RoomState> {
        self.state.lock().await.rooms.get(room_id).cloned()
    }

    pub async fn get_rooms(&self) -> Vec<RoomState> {
        self.state.lock().await.rooms.values().cloned().collect()
    }

    pub async fn dm_primary_room(&self, contact: &str) -> Option<RoomId> {
        self.state.lock().await.dm.primary_room(contact).cloned()
    }

    /// Wipe all state, for logout. Only legitimate way to destroy a
    /// `RoomState` (§3 "Lifecycles").
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.user_id = None;
        state.rooms.clear();
        state.next_batch = None;
        state.dm = DmRoomService::new();
        state.buffer = EventBuffer::default();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One short-timeout request, process it, emit `synced`, then enter the
    /// long-poll loop. Returns once `stop()` has taken effect.
    pub async fn start(&self) -> Result<(), SyncError> {
        {
            let state = self.state.lock().await;
            if state.user_id.is_none() {
                return Err(SyncError::NotLoggedIn);
            }
        }
        self.running.store(true, Ordering::SeqCst);

        let since = self.state.lock().await.next_batch.clone();
        self.poll_once(since, Duration::from_secs(5)).await;

        let mut retry = INITIAL_RETRY;
        let mut prune_ticker = tokio::time::interval(PRUNE_INTERVAL);
        prune_ticker.tick().await; // consume the immediate first tick

        while self.running.load(Ordering::SeqCst) {
            let since = self.state.lock().await.next_batch.clone();
            match self.try_sync_once(since).await {
                Ok(()) => {
                    retry = INITIAL_RETRY;
                }
                Err(err) => {
                    if self.handle_possible_authorization_loss(&err).await {
                        retry = INITIAL_RETRY;
                        continue;
                    }
                    let _ = self.events_tx.send(SyncEvent::Error { message: err.to_string() });
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
                    tokio::time::sleep(retry + jitter).await;
                    retry = (retry * 2).min(MAX_RETRY);
                }
            }

            self.state.lock().await.buffer.prune();
        }

        Ok(())
    }

    async fn poll_once(&self, since: Option<String>, timeout: Duration) {
        if let Err(err) = self.try_sync_once_with_timeout(since, timeout).await {
            let _ = self.events_tx.send(SyncEvent::Error { message: err.to_string() });
        }
    }

    async fn try_sync_once(&self, since: Option<String>) -> Result<(), RpcError> {
        self.try_sync_once_with_timeout(since, self.timeout).await
    }

    /// `true` if the error was an unknown-token rejection and a refresh
    /// callback resolved a new token, meaning the caller should retry
    /// immediately instead of backing off.
    async fn handle_possible_authorization_loss(&self, err: &RpcError) -> bool {
        if err.errcode.as_deref() != Some(UNKNOWN_TOKEN_ERRCODE) {
            return false;
        }

        let callback = self.token_refresh.lock().await;
        match callback.as_ref() {
            Some(callback) => match callback().await {
                Some(_new_token) => {
                    self.offline.store(false, Ordering::SeqCst);
                    true
                }
                None => {
                    self.offline.store(true, Ordering::SeqCst);
                    let _ = self.events_tx.send(SyncEvent::Offline);
                    false
                }
            },
            None => {
                self.offline.store(true, Ordering::SeqCst);
                let _ = self.events_tx.send(SyncEvent::Offline);
                false
            }
        }
    }

    async fn try_sync_once_with_timeout(&self, since: Option<String>, timeout: Duration) -> Result<(), RpcError> {
        let response = self
            .api
            .sync(SyncRequest {
                since,
                timeout_ms: timeout.as_millis() as u64,
                set_presence: None,
                full_state: None,
            })
            .await?;

        let next_batch = response.next_batch.clone();
        self.process_response(response).await;

        {
            let mut state = self.state.lock().await;
            state.next_batch = Some(next_batch.clone());
        }
        self.drain_classified_rooms().await;
        let _ = self.events_tx.send(SyncEvent::Synced { next_batch });
        Ok(())
    }

    async fn process_response(&self, response: super::rpc::SyncResponse) {
        let mut state = self.state.lock().await;

        for event in response.account_data {
            let content = event.content.clone();
            if event.event_type == "m.direct" {
                if let Ok(direct) = serde_json::from_value::<HashMap<UserId, Vec<RoomId>>>(content.clone()) {
                    let rooms_snapshot = state.rooms.clone();
                    state.dm.apply_direct_account_data(&direct, &rooms_snapshot);
                }
            }
            let _ = self.events_tx.send(SyncEvent::AccountDataUpdated {
                event_type: event.event_type,
                content,
            });
        }

        for (room_id, joined) in response.joined_rooms {
            let room = state
                .rooms
                .entry(room_id.clone())
                .or_insert_with(|| RoomState::new(room_id.clone()));

            for event in joined.state.iter().chain(joined.state_after.iter()) {
                if let Some(user_id) = room.apply_state_event(event) {
                    let _ = self.events_tx.send(SyncEvent::MembershipChanged {
                        room_id: room_id.clone(),
                        user_id,
                    });
                }
            }

            room.summary.heroes = joined.summary_heroes;
            room.unread_notifications = joined.unread_notifications;
            room.unread_highlights = joined.unread_highlights;
            if let Some(prev_batch) = joined.timeline.prev_batch {
                room.prev_batch = Some(prev_batch);
            }

            for event in joined.timeline.events {
                if event.state_key.is_some() {
                    if let Some(user_id) = room.apply_state_event(&event) {
                        let _ = self.events_tx.send(SyncEvent::MembershipChanged {
                            room_id: room_id.clone(),
                            user_id,
                        });
                    }
                }
                if room.push_timeline_event(event.clone()) {
                    let _ = self.events_tx.send(SyncEvent::TimelineEvent {
                        room_id: room_id.clone(),
                        event,
                    });
                }
            }

            for event in joined.ephemeral {
                if event.event_type == "m.receipt" {
                    apply_receipt_content(room, &event.content, &self.events_tx, &room_id);
                }
            }

            for event in joined.account_data {
                room.account_data.insert(event.event_type, event.content);
            }

            let _ = self.events_tx.send(SyncEvent::RoomUpdated {
                room_id: room_id.clone(),
            });
        }

        for (room_id, invited) in response.invited_rooms {
            let room = state
                .rooms
                .entry(room_id.clone())
                .or_insert_with(|| RoomState::new(room_id.clone()));
            for event in invited.invite_state {
                if let Some(user_id) = room.apply_state_event(&event) {
                    let _ = self.events_tx.send(SyncEvent::MembershipChanged {
                        room_id: room_id.clone(),
                        user_id,
                    });
                }
            }
            let _ = self.events_tx.send(SyncEvent::RoomUpdated {
                room_id: room_id.clone(),
            });
        }

        for (room_id, left) in response.left_rooms {
            let room = state
                .rooms
                .entry(room_id.clone())
                .or_insert_with(|| RoomState::new(room_id.clone()));
            for event in left.state {
                if let Some(user_id) = room.apply_state_event(&event) {
                    let _ = self.events_tx.send(SyncEvent::MembershipChanged {
                        room_id: room_id.clone(),
                        user_id,
                    });
                }
            }
            for event in left.timeline.events {
                if room.push_timeline_event(event.clone()) {
                    let _ = self.events_tx.send(SyncEvent::TimelineEvent {
                        room_id: room_id.clone(),
                        event,
                    });
                }
            }
            let _ = self.events_tx.send(SyncEvent::RoomUpdated {
                room_id: room_id.clone(),
            });
        }
    }

    /// After every sync tick (and whenever classification changes), drain
    /// any buffered room whose DM status is now known.
    async fn drain_classified_rooms(&self) {
        let mut state = self.state.lock().await;
        let own = state.user_id.clone();
        let Some(own) = own else { return };

        let candidate_rooms = state.buffer.buffered_room_ids();
        let mut to_emit = Vec::new();
        for room_id in candidate_rooms {
            let classified = state
                .rooms
                .get(&room_id)
                .map(|room| dm::is_dm_room(room, &own) || state.dm.contact_for_room(&room_id).is_some())
                .unwrap_or(false);
            if classified {
                let events = state.buffer.drain(&room_id);
                to_emit.push((room_id, events));
            }
        }

        drop(state);
        for (room_id, events) in to_emit {
            for event in events {
                let _ = self.events_tx.send(SyncEvent::TimelineEvent { room_id: room_id.clone(), event });
            }
        }
    }

    /// Buffer a timeline event for a room that hasn't been classified as DM
    /// or non-DM yet, instead of handing it to the normal handler.
    pub async fn buffer_unclassified_event(&self, room_id: &str, event: Event) {
        let mut state = self.state.lock().await;
        if !state.buffer.push(room_id, event) {
            log::warn!("event buffer full for room {room_id}, dropping event");
        }
    }

    /// Fetch older timeline events via `prev_batch`, prepend non-duplicates,
    /// and advance `prev_batch` to the returned end token.
    pub async fn backfill_room(&self, room_id: &str, limit: u32) -> Result<(), SyncError> {
        let from = {
            let state = self.state.lock().await;
            state
                .rooms
                .get(room_id)
                .and_then(|r| r.prev_batch.clone())
                .ok_or_else(|| SyncError::NoPrevBatch(room_id.to_string()))?
        };

        let page = self
            .api
            .get_messages(room_id, &from, Direction::Backward, limit)
            .await
            .map_err(|e| {
                if e.errcode.as_deref() == Some(UNKNOWN_TOKEN_ERRCODE) {
                    SyncError::AuthorizationLost
                } else {
                    SyncError::Request(e.to_string())
                }
            })?;

        let mut state = self.state.lock().await;
        let room = state
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomState::new(room_id.to_string()));
        let fresh = room.prepend_timeline_events(page.chunk);
        room.prev_batch = page.end;
        drop(state);

        for event in fresh {
            let _ = self.events_tx.send(SyncEvent::TimelineEvent {
                room_id: room_id.to_string(),
                event,
            });
        }
        let _ = self.events_tx.send(SyncEvent::RoomUpdated {
            room_id: room_id.to_string(),
        });
        Ok(())
    }
}

fn apply_receipt_content(
    room: &mut RoomState,
    content: &serde_json::Value,
    events_tx: &broadcast::Sender<SyncEvent>,
    room_id: &str,
) {
    let Some(obj) = content.as_object() else { return };
    for (event_id, receipt_types) in obj {
        let Some(read) = receipt_types.get("m.read").and_then(|v| v.as_object()) else {
            continue;
        };
        let user_ids: Vec<UserId> = read.keys().cloned().collect();
        room.apply_receipt(event_id, user_ids);
        let _ = events_tx.send(SyncEvent::ReceiptUpdated {
            room_id: room_id.to_string(),
            event_id: event_id.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::rpc::{
        ContentUri, CreateRoomRequest, HomeserverApi, LoginResult, MessagesPage, RpcError, RpcResult, SyncResponse, WhoAmI,
    };
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct FakeApi {
        responses: Mutex<Vec<SyncResponse>>,
        call_count: AtomicU32,
    }

    #[async_trait]
    impl HomeserverApi for FakeApi {
        async fn login(&self, _u: &str, _p: &str, _d: &str) -> RpcResult<LoginResult> {
            unimplemented!()
        }
        async fn logout(&self) -> RpcResult<()> {
            Ok(())
        }
        async fn whoami(&self) -> RpcResult<WhoAmI> {
            unimplemented!()
        }
        async fn sync(&self, _req: SyncRequest) -> RpcResult<SyncResponse> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                return Err(RpcError::new("no more canned responses"));
            }
            Ok(responses.remove(0))
        }
        async fn create_room(&self, _req: CreateRoomRequest) -> RpcResult<String> {
            unimplemented!()
        }
        async fn join_room(&self, _id: &str) -> RpcResult<String> {
            unimplemented!()
        }
        async fn invite_to_room(&self, _room_id: &str, _user_id: &str) -> RpcResult<()> {
            unimplemented!()
        }
        async fn send_event(&self, _r: &str, _t: &str, _c: serde_json::Value, _txn: &str) -> RpcResult<String> {
            unimplemented!()
        }
        async fn redact_event(&self, _r: &str, _e: &str, _reason: Option<&str>, _txn: &str) -> RpcResult<String> {
            unimplemented!()
        }
        async fn send_read_receipt(&self, _r: &str, _e: &str, _t: Option<&str>) -> RpcResult<()> {
            Ok(())
        }
        async fn upload_media(&self, _b: Vec<u8>, _c: &str, _f: Option<&str>) -> RpcResult<ContentUri> {
            unimplemented!()
        }
        async fn download_media(&self, _m: &str) -> RpcResult<Vec<u8>> {
            unimplemented!()
        }
        async fn get_account_data(&self, _u: &str, _t: &str) -> RpcResult<serde_json::Value> {
            unimplemented!()
        }
        async fn set_account_data(&self, _u: &str, _t: &str, _c: serde_json::Value) -> RpcResult<()> {
            Ok(())
        }
        async fn get_room_account_data(&self, _r: &str, _u: &str, _t: &str) -> RpcResult<serde_json::Value> {
            unimplemented!()
        }
        async fn set_room_account_data(&self, _r: &str, _u: &str, _t: &str, _c: serde_json::Value) -> RpcResult<()> {
            Ok(())
        }
        async fn get_messages(&self, _r: &str, _f: &str, _d: Direction, _l: u32) -> RpcResult<MessagesPage> {
            unimplemented!()
        }
    }

    fn timeline_event(id: &str) -> Event {
        Event {
            event_id: id.to_string(),
            sender: "@a:x".to_string(),
            event_type: "m.room.message".to_string(),
            state_key: None,
            content: serde_json::json!({"body": "hi"}),
            origin_server_ts: 1,
        }
    }

    #[tokio::test]
    async fn duplicate_event_across_two_syncs_is_emitted_once() {
        let api = Arc::new(FakeApi {
            responses: Mutex::new(vec![]),
            call_count: AtomicU32::new(0),
        });

        let engine = SyncEngine::new(api);
        let mut rx = engine.subscribe();

        // Drive process_response directly twice with the same event id,
        // as two consecutive sync responses would.
        let mut joined_1 = HashMap::new();
        let mut r1 = super::super::rpc::JoinedRoom::default();
        r1.timeline.events = vec![timeline_event("$dup")];
        joined_1.insert("!r:x".to_string(), r1);
        engine.process_response(SyncResponse { next_batch: "a".into(), joined_rooms: joined_1, ..Default::default() }).await;

        let mut joined_2 = HashMap::new();
        let mut r2 = super::super::rpc::JoinedRoom::default();
        r2.timeline.events = vec![timeline_event("$dup")];
        joined_2.insert("!r:x".to_string(), r2);
        engine.process_response(SyncResponse { next_batch: "b".into(), joined_rooms: joined_2, ..Default::default() }).await;

        let mut timeline_emits = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SyncEvent::TimelineEvent { .. }) {
                timeline_emits += 1;
            }
        }
        assert_eq!(timeline_emits, 1);

        let room = engine.get_room("!r:x").await.unwrap();
        assert_eq!(room.timeline.len(), 1);
    }

    #[tokio::test]
    async fn start_without_user_id_fails_fast() {
        let api = Arc::new(FakeApi {
            responses: Mutex::new(vec![]),
            call_count: AtomicU32::new(0),
        });
        let engine = SyncEngine::new(api);
        assert_eq!(engine.start().await, Err(SyncError::NotLoggedIn));
    }

    #[tokio::test]
    async fn buffered_event_drains_once_room_classified() {
        let api = Arc::new(FakeApi {
            responses: Mutex::new(vec![]),
            call_count: AtomicU32::new(0),
        });
        let engine = SyncEngine::new(api);
        engine.set_user_id("@me:x").await;

        engine.buffer_unclassified_event("!r:x", timeline_event("$buffered")).await;

        let mut rooms = HashMap::new();
        let mut room = RoomState::new("!r:x".to_string());
        room.apply_state_event(&Event {
            event_id: "$member".to_string(),
            sender: "@me:x".to_string(),
            event_type: "m.room.member".to_string(),
            state_key: Some("@me:x".to_string()),
            content: serde_json::json!({"membership": "join", "is_direct": true}),
            origin_server_ts: 1,
        });
        rooms.insert("!r:x".to_string(), room);
        {
            let mut state = engine.state.lock().await;
            state.rooms = rooms;
        }

        let mut rx = engine.subscribe();
        engine.drain_classified_rooms().await;

        let mut found = false;
        while let Ok(event) = rx.try_recv() {
            if let SyncEvent::TimelineEvent { event, .. } = event {
                if event.event_id == "$buffered" {
                    found = true;
                }
            }
        }
        assert!(found);
    }

    #[tokio::test]
    async fn unknown_token_without_callback_marks_offline() {
        let api = Arc::new(FakeApi {
            responses: Mutex::new(vec![]),
            call_count: AtomicU32::new(0),
        });
        let engine = SyncEngine::new(api);
        let mut rx = engine.subscribe();

        let err = RpcError {
            errcode: Some(UNKNOWN_TOKEN_ERRCODE.to_string()),
            message: "token invalid".to_string(),
        };
        let recovered = engine.handle_possible_authorization_loss(&err).await;
        assert!(!recovered);
        assert!(engine.is_offline());
        assert!(matches!(rx.try_recv(), Ok(SyncEvent::Offline)));
    }

    #[tokio::test]
    async fn unknown_token_with_callback_recovers() {
        let api = Arc::new(FakeApi {
            responses: Mutex::new(vec![]),
            call_count: AtomicU32::new(0),
        });
        let engine = SyncEngine::new(api);
        engine
            .set_token_refresh_callback(Box::new(|| {
                Box::pin(async { Some("new-token".to_string()) })
            }))
            .await;

        let err = RpcError {
            errcode: Some(UNKNOWN_TOKEN_ERRCODE.to_string()),
            message: "token invalid".to_string(),
        };
        let recovered = engine.handle_possible_authorization_loss(&err).await;
        assert!(recovered);
        assert!(!engine.is_offline());
    }
}
