//! `reqwest`-backed `HomeserverApi` implementation, gated behind the
//! `http-client` feature so `wata-core` can be embedded with a caller-
//! supplied transport instead (§1, §6).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::rpc::{
    ContentUri, CreateRoomRequest, Direction, HomeserverApi, LoginResult, MessagesPage, RpcError,
    RpcResult, SyncRequest, SyncResponse, WhoAmI,
};
use super::state::Event;

/// A thin Matrix client-server API client. Holds the homeserver base URL
/// and a bearer access token; every method is one HTTP round-trip.
pub struct ReqwestHomeserverApi {
    client: Client,
    homeserver: String,
    access_token: std::sync::RwLock<Option<String>>,
}

impl ReqwestHomeserverApi {
    pub fn new(homeserver: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            homeserver: homeserver.into(),
            access_token: std::sync::RwLock::new(None),
        }
    }

    pub fn with_access_token(homeserver: impl Into<String>, access_token: impl Into<String>) -> Self {
        let api = Self::new(homeserver);
        *api.access_token.write().unwrap() = Some(access_token.into());
        api
    }

    /// Replace the bearer token, e.g. from a `SyncEngine` token-refresh
    /// callback after the homeserver rejects the current one.
    pub fn set_access_token(&self, access_token: impl Into<String>) {
        *self.access_token.write().unwrap() = Some(access_token.into());
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.homeserver.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.access_token.read().unwrap().as_ref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> RpcResult<T> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| RpcError::new(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let errcode = body.get("errcode").and_then(Value::as_str).map(str::to_string);
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("homeserver returned {status}"));
            return Err(RpcError { errcode, message });
        }

        response.json::<T>().await.map_err(|e| RpcError::new(e.to_string()))
    }
}

#[async_trait]
impl HomeserverApi for ReqwestHomeserverApi {
    async fn login(&self, username: &str, password: &str, device_name: &str) -> RpcResult<LoginResult> {
        #[derive(serde::Deserialize)]
        struct Raw {
            user_id: String,
            access_token: String,
            device_id: String,
        }

        let body = json!({
            "type": "m.login.password",
            "identifier": {"type": "m.id.user", "user": username},
            "password": password,
            "initial_device_display_name": device_name,
        });
        let raw: Raw = self
            .send_json(self.client.post(self.url("/_matrix/client/v3/login")).json(&body))
            .await?;
        *self.access_token.write().unwrap() = Some(raw.access_token.clone());
        Ok(LoginResult {
            user_id: raw.user_id,
            access_token: raw.access_token,
            device_id: raw.device_id,
        })
    }

    async fn logout(&self) -> RpcResult<()> {
        self.send_json::<Value>(self.client.post(self.url("/_matrix/client/v3/logout")).json(&json!({})))
            .await?;
        *self.access_token.write().unwrap() = None;
        Ok(())
    }

    async fn whoami(&self) -> RpcResult<WhoAmI> {
        #[derive(serde::Deserialize)]
        struct Raw {
            user_id: String,
            device_id: Option<String>,
        }
        let raw: Raw = self
            .send_json(self.client.get(self.url("/_matrix/client/v3/account/whoami")))
            .await?;
        Ok(WhoAmI {
            user_id: raw.user_id,
            device_id: raw.device_id,
        })
    }

    async fn sync(&self, request: SyncRequest) -> RpcResult<SyncResponse> {
        let mut query = vec![("timeout", request.timeout_ms.to_string())];
        if let Some(since) = &request.since {
            query.push(("since", since.clone()));
        }
        if let Some(full_state) = request.full_state {
            query.push(("full_state", full_state.to_string()));
        }
        if let Some(set_presence) = &request.set_presence {
            query.push(("set_presence", set_presence.clone()));
        }

        self.send_json(
            self.client
                .get(self.url("/_matrix/client/v3/sync"))
                .query(&query),
        )
        .await
    }

    async fn create_room(&self, request: CreateRoomRequest) -> RpcResult<String> {
        #[derive(serde::Deserialize)]
        struct Raw {
            room_id: String,
        }
        let mut body = json!({
            "is_direct": request.is_direct,
            "invite": request.invite,
            "preset": request.preset,
            "visibility": request.visibility,
        });
        if let Some(name) = &request.name {
            body["name"] = json!(name);
        }
        if let Some(alias) = &request.alias {
            body["room_alias_name"] = json!(alias);
        }
        let raw: Raw = self
            .send_json(self.client.post(self.url("/_matrix/client/v3/createRoom")).json(&body))
            .await?;
        Ok(raw.room_id)
    }

    async fn join_room(&self, id_or_alias: &str) -> RpcResult<String> {
        #[derive(serde::Deserialize)]
        struct Raw {
            room_id: String,
        }
        let path = format!("/_matrix/client/v3/join/{}", urlencode(id_or_alias));
        let raw: Raw = self
            .send_json(self.client.post(self.url(&path)).json(&json!({})))
            .await?;
        Ok(raw.room_id)
    }

    async fn invite_to_room(&self, room_id: &str, user_id: &str) -> RpcResult<()> {
        let path = format!("/_matrix/client/v3/rooms/{}/invite", urlencode(room_id));
        self.send_json::<Value>(
            self.client
                .post(self.url(&path))
                .json(&json!({"user_id": user_id})),
        )
        .await?;
        Ok(())
    }

    async fn send_event(&self, room_id: &str, event_type: &str, content: Value, txn_id: &str) -> RpcResult<String> {
        #[derive(serde::Deserialize)]
        struct Raw {
            event_id: String,
        }
        let path = format!(
            "/_matrix/client/v3/rooms/{}/send/{}/{}",
            urlencode(room_id),
            urlencode(event_type),
            urlencode(txn_id)
        );
        let raw: Raw = self.send_json(self.client.put(self.url(&path)).json(&content)).await?;
        Ok(raw.event_id)
    }

    async fn redact_event(&self, room_id: &str, event_id: &str, reason: Option<&str>, txn_id: &str) -> RpcResult<String> {
        #[derive(serde::Deserialize)]
        struct Raw {
            event_id: String,
        }
        let path = format!(
            "/_matrix/client/v3/rooms/{}/redact/{}/{}",
            urlencode(room_id),
            urlencode(event_id),
            urlencode(txn_id)
        );
        let mut body = json!({});
        if let Some(reason) = reason {
            body["reason"] = json!(reason);
        }
        let raw: Raw = self.send_json(self.client.put(self.url(&path)).json(&body)).await?;
        Ok(raw.event_id)
    }

    async fn send_read_receipt(&self, room_id: &str, event_id: &str, thread_id: Option<&str>) -> RpcResult<()> {
        let path = format!(
            "/_matrix/client/v3/rooms/{}/receipt/m.read/{}",
            urlencode(room_id),
            urlencode(event_id)
        );
        let mut body = json!({});
        if let Some(thread_id) = thread_id {
            body["thread_id"] = json!(thread_id);
        }
        self.send_json::<Value>(self.client.post(self.url(&path)).json(&body)).await?;
        Ok(())
    }

    async fn upload_media(&self, bytes: Vec<u8>, content_type: &str, filename: Option<&str>) -> RpcResult<ContentUri> {
        #[derive(serde::Deserialize)]
        struct Raw {
            content_uri: String,
        }
        let mut query = Vec::new();
        if let Some(filename) = filename {
            query.push(("filename", filename.to_string()));
        }
        let raw: Raw = self
            .send_json(
                self.client
                    .post(self.url("/_matrix/media/v3/upload"))
                    .query(&query)
                    .header("Content-Type", content_type)
                    .body(bytes),
            )
            .await?;
        Ok(ContentUri(raw.content_uri))
    }

    async fn download_media(&self, mxc_url: &str) -> RpcResult<Vec<u8>> {
        let (server, media_id) = parse_mxc(mxc_url)?;
        let path = format!("/_matrix/media/v3/download/{server}/{media_id}");
        let response = self
            .authed(self.client.get(self.url(&path)))
            .send()
            .await
            .map_err(|e| RpcError::new(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RpcError::new(format!("media download failed: {}", response.status())));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| RpcError::new(e.to_string()))
    }

    async fn get_account_data(&self, user_id: &str, event_type: &str) -> RpcResult<Value> {
        let path = format!(
            "/_matrix/client/v3/user/{}/account_data/{}",
            urlencode(user_id),
            urlencode(event_type)
        );
        self.send_json(self.client.get(self.url(&path))).await
    }

    async fn set_account_data(&self, user_id: &str, event_type: &str, content: Value) -> RpcResult<()> {
        let path = format!(
            "/_matrix/client/v3/user/{}/account_data/{}",
            urlencode(user_id),
            urlencode(event_type)
        );
        self.send_json::<Value>(self.client.put(self.url(&path)).json(&content)).await?;
        Ok(())
    }

    async fn get_room_account_data(&self, room_id: &str, user_id: &str, event_type: &str) -> RpcResult<Value> {
        let path = format!(
            "/_matrix/client/v3/user/{}/rooms/{}/account_data/{}",
            urlencode(user_id),
            urlencode(room_id),
            urlencode(event_type)
        );
        self.send_json(self.client.get(self.url(&path))).await
    }

    async fn set_room_account_data(&self, room_id: &str, user_id: &str, event_type: &str, content: Value) -> RpcResult<()> {
        let path = format!(
            "/_matrix/client/v3/user/{}/rooms/{}/account_data/{}",
            urlencode(user_id),
            urlencode(room_id),
            urlencode(event_type)
        );
        self.send_json::<Value>(self.client.put(self.url(&path)).json(&content)).await?;
        Ok(())
    }

    async fn get_messages(&self, room_id: &str, from: &str, dir: Direction, limit: u32) -> RpcResult<MessagesPage> {
        #[derive(serde::Deserialize)]
        struct Raw {
            chunk: Vec<Event>,
            end: Option<String>,
        }
        let dir_str = match dir {
            Direction::Backward => "b",
            Direction::Forward => "f",
        };
        let path = format!("/_matrix/client/v3/rooms/{}/messages", urlencode(room_id));
        let raw: Raw = self
            .send_json(self.client.get(self.url(&path)).query(&[
                ("from", from.to_string()),
                ("dir", dir_str.to_string()),
                ("limit", limit.to_string()),
            ]))
            .await?;
        Ok(MessagesPage {
            chunk: raw.chunk,
            end: raw.end,
        })
    }
}

fn urlencode(segment: &str) -> String {
    segment
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

fn parse_mxc(mxc_url: &str) -> RpcResult<(&str, &str)> {
    let rest = mxc_url
        .strip_prefix("mxc://")
        .ok_or_else(|| RpcError::new(format!("not an mxc:// uri: {mxc_url}")))?;
    rest.split_once('/')
        .ok_or_else(|| RpcError::new(format!("malformed mxc:// uri: {mxc_url}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("!room:example.org"), "%21room%3Aexample.org");
        assert_eq!(urlencode("alice"), "alice");
    }

    #[test]
    fn parse_mxc_splits_server_and_media_id() {
        assert_eq!(parse_mxc("mxc://example.org/abc123").unwrap(), ("example.org", "abc123"));
        assert!(parse_mxc("https://example.org/abc123").is_err());
    }
}
