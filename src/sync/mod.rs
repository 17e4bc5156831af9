//! Matrix-style room-sync state engine (§3-§9): long-poll loop, room and
//! membership state, direct-message classification, and the pre-
//! classification event buffer.

pub mod buffer;
pub mod dm;
pub mod engine;
#[cfg(feature = "http-client")]
pub mod http;
pub mod rpc;
pub mod state;

pub use buffer::EventBuffer;
pub use dm::{is_dm_room, DmRoomService};
pub use engine::{SyncEngine, SyncEvent};
#[cfg(feature = "http-client")]
pub use http::ReqwestHomeserverApi;
pub use rpc::{make_txn_id, HomeserverApi, RpcError, RpcResult};
pub use state::{Event, MemberInfo, Membership, RoomState};
