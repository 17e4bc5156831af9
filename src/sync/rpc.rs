//! The homeserver RPC surface (§6). `wata-core` only depends on this trait
//! — the transport (HTTP, retries at the wire level, TLS) is an external
//! collaborator per §1. `crate::sync::http::ReqwestHomeserverApi` is the one
//! concrete implementation this crate ships, behind the `http-client`
//! feature.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::Event;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncRequest {
    pub since: Option<String>,
    pub timeout_ms: u64,
    pub set_presence: Option<String>,
    pub full_state: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RoomTimeline {
    pub events: Vec<Event>,
    pub prev_batch: Option<String>,
    #[serde(default)]
    pub limited: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct JoinedRoom {
    #[serde(default)]
    pub state: Vec<Event>,
    #[serde(default)]
    pub state_after: Vec<Event>,
    #[serde(default)]
    pub timeline: RoomTimeline,
    #[serde(default)]
    pub ephemeral: Vec<Event>,
    #[serde(default)]
    pub account_data: Vec<Event>,
    #[serde(default)]
    pub summary_heroes: Vec<String>,
    #[serde(default)]
    pub unread_notifications: u32,
    #[serde(default)]
    pub unread_highlights: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InvitedRoom {
    #[serde(default)]
    pub invite_state: Vec<Event>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LeftRoom {
    #[serde(default)]
    pub state: Vec<Event>,
    #[serde(default)]
    pub timeline: RoomTimeline,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub account_data: Vec<Event>,
    #[serde(default)]
    pub joined_rooms: HashMap<String, JoinedRoom>,
    #[serde(default)]
    pub invited_rooms: HashMap<String, InvitedRoom>,
    #[serde(default)]
    pub left_rooms: HashMap<String, LeftRoom>,
}

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub user_id: String,
    pub access_token: String,
    pub device_id: String,
}

#[derive(Debug, Clone)]
pub struct WhoAmI {
    pub user_id: String,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateRoomRequest {
    pub is_direct: bool,
    pub invite: Vec<String>,
    pub preset: String,
    pub visibility: String,
    pub name: Option<String>,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ContentUri(pub String);

#[derive(Debug, Clone)]
pub struct MessagesPage {
    pub chunk: Vec<Event>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Backward,
    Forward,
}

/// A structured RPC error, carrying the Matrix `errcode` when known.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} (errcode={errcode:?})")]
pub struct RpcError {
    pub errcode: Option<String>,
    pub message: String,
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            errcode: None,
            message: message.into(),
        }
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Typed Matrix-style homeserver RPC surface (§6). Every failure is
/// retryable per §5/§7 unless otherwise noted; the sync loop treats any
/// error uniformly and backs off.
#[async_trait]
pub trait HomeserverApi: Send + Sync {
    async fn login(&self, username: &str, password: &str, device_name: &str) -> RpcResult<LoginResult>;
    async fn logout(&self) -> RpcResult<()>;
    async fn whoami(&self) -> RpcResult<WhoAmI>;
    async fn sync(&self, request: SyncRequest) -> RpcResult<SyncResponse>;
    async fn create_room(&self, request: CreateRoomRequest) -> RpcResult<String>;
    async fn join_room(&self, id_or_alias: &str) -> RpcResult<String>;
    async fn invite_to_room(&self, room_id: &str, user_id: &str) -> RpcResult<()>;
    async fn send_event(
        &self,
        room_id: &str,
        event_type: &str,
        content: Value,
        txn_id: &str,
    ) -> RpcResult<String>;
    async fn redact_event(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
        txn_id: &str,
    ) -> RpcResult<String>;
    async fn send_read_receipt(&self, room_id: &str, event_id: &str, thread_id: Option<&str>) -> RpcResult<()>;
    async fn upload_media(&self, bytes: Vec<u8>, content_type: &str, filename: Option<&str>) -> RpcResult<ContentUri>;
    async fn download_media(&self, mxc_url: &str) -> RpcResult<Vec<u8>>;
    async fn get_account_data(&self, user_id: &str, event_type: &str) -> RpcResult<Value>;
    async fn set_account_data(&self, user_id: &str, event_type: &str, content: Value) -> RpcResult<()>;
    async fn get_room_account_data(&self, room_id: &str, user_id: &str, event_type: &str) -> RpcResult<Value>;
    async fn set_room_account_data(&self, room_id: &str, user_id: &str, event_type: &str, content: Value) -> RpcResult<()>;
    async fn get_messages(&self, room_id: &str, from: &str, dir: Direction, limit: u32) -> RpcResult<MessagesPage>;
}

/// Generate a Matrix transaction id: `wata-<ms>-<counter>`. The server
/// dedupes on this.
pub fn make_txn_id(now_ms: u64, counter: u64) -> String {
    format!("wata-{now_ms}-{counter}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txn_id_has_expected_shape() {
        let id = make_txn_id(1_700_000_000_000, 7);
        assert_eq!(id, "wata-1700000000000-7");
    }
}
