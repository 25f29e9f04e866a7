//! PostgREST gateway over `reqwest`.
//!
//! Tables live at `<base_url>/rest/v1/<table>`. Every request carries the
//! project `apikey` and a bearer credential (the user's access token, or the
//! api key when no user is signed in).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;

use courtsync_core::config::Config;
use courtsync_core::entity::{Entity, SyncableEntity};
use courtsync_core::types::{EntityId, EntityKind};

use crate::error::{RemoteError, SyncError};
use crate::gateway::RemoteGateway;

const MAX_ERROR_BODY_CHARS: usize = 512;
const PREFER_UPSERT: &str = "resolution=merge-duplicates,return=representation";
const PREFER_REPRESENTATION: &str = "return=representation";

#[derive(Debug, Clone)]
pub struct RestGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    access_token: Option<String>,
}

impl RestGateway {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key,
            access_token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        Self::new(
            &config.remote.base_url,
            config.remote.api_key.clone(),
            config.remote.access_token.clone(),
            config.sync.request_timeout(),
        )
    }

    /// `host:port` the reachability probe should connect to.
    pub fn probe_target(&self) -> Option<(String, u16)> {
        probe_target(&self.base_url)
    }

    fn table_url(&self, kind: EntityKind) -> String {
        format!("{}/rest/v1/{}", self.base_url, kind.table_name())
    }

    fn row_url(&self, kind: EntityKind, id: EntityId) -> String {
        format!("{}?id=eq.{}", self.table_url(kind), id)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(key) {
                headers.insert("apikey", value);
            }
        }
        if let Some(token) = self.access_token.as_ref().or(self.api_key.as_ref()) {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        self.client.request(method, url).headers(headers)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = builder.send().await.map_err(map_transport)?;
        check_status(response).await
    }

    async fn rows(&self, kind: EntityKind, response: Response) -> Result<Vec<Entity>, RemoteError> {
        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        rows.into_iter().map(|row| decode_row(kind, row)).collect()
    }

    async fn single(&self, kind: EntityKind, response: Response) -> Result<Entity, RemoteError> {
        self.rows(kind, response)
            .await?
            .into_iter()
            .next()
            .ok_or(RemoteError::NotFound)
    }
}

#[async_trait]
impl RemoteGateway for RestGateway {
    async fn fetch_all(&self, kind: EntityKind) -> Result<Vec<Entity>, RemoteError> {
        let url = format!("{}?select=*", self.table_url(kind));
        let response = self.send(self.request(Method::GET, &url)).await?;
        let rows = self.rows(kind, response).await?;
        tracing::debug!(%kind, rows = rows.len(), "fetched remote rows");
        Ok(rows)
    }

    async fn insert(&self, entity: &Entity) -> Result<Entity, RemoteError> {
        let kind = entity.kind();
        let builder = self
            .request(Method::POST, &self.table_url(kind))
            .header("Prefer", PREFER_REPRESENTATION)
            .json(&encode_row(entity)?);
        let response = self.send(builder).await?;
        self.single(kind, response).await
    }

    async fn update(&self, entity: &Entity) -> Result<Entity, RemoteError> {
        let kind = entity.kind();
        let builder = self
            .request(Method::PATCH, &self.row_url(kind, entity.id()))
            .header("Prefer", PREFER_REPRESENTATION)
            .json(&encode_row(entity)?);
        let response = self.send(builder).await?;
        self.single(kind, response).await
    }

    async fn delete(&self, kind: EntityKind, id: EntityId) -> Result<(), RemoteError> {
        let builder = self
            .request(Method::DELETE, &self.row_url(kind, id))
            .header("Prefer", PREFER_REPRESENTATION);
        let response = self.send(builder).await?;
        self.single(kind, response).await.map(|_| ())
    }

    async fn upsert(&self, entity: &Entity) -> Result<Entity, RemoteError> {
        let kind = entity.kind();
        let url = format!("{}?on_conflict=id", self.table_url(kind));
        let builder = self
            .request(Method::POST, &url)
            .header("Prefer", PREFER_UPSERT)
            .json(&encode_row(entity)?);
        let response = self.send(builder).await?;
        self.single(kind, response).await
    }
}

// ---------------------------------------------------------------------------
// Row codec
// ---------------------------------------------------------------------------

/// Entity → remote row: no `kind` tag, no local-only `last_synced_at`.
pub fn encode_row(entity: &Entity) -> Result<Value, RemoteError> {
    let mut value =
        serde_json::to_value(entity).map_err(|e| RemoteError::Malformed(e.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.remove("kind");
        object.remove("last_synced_at");
    }
    Ok(value)
}

/// Remote row → entity of `kind`. Any `last_synced_at` the remote returns is
/// dropped.
pub fn decode_row(kind: EntityKind, row: Value) -> Result<Entity, RemoteError> {
    let Value::Object(mut object) = row else {
        return Err(RemoteError::Malformed(format!(
            "expected an object row from {}",
            kind.table_name()
        )));
    };
    object.remove("last_synced_at");
    object.insert("kind".into(), Value::String(kind.to_string()));
    serde_json::from_value(Value::Object(object))
        .map_err(|e| RemoteError::Malformed(format!("{}: {e}", kind.table_name())))
}

/// `(host, port)` for a base URL, using the scheme's default port.
pub fn probe_target(base_url: &str) -> Option<(String, u16)> {
    let url = Url::parse(base_url).ok()?;
    let host = url.host_str()?.to_string();
    let port = url.port_or_known_default()?;
    Some((host, port))
}

fn map_transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Network(format!("request timed out: {err}"))
    } else if err.is_connect() {
        RemoteError::Unreachable(err.to_string())
    } else if err.is_decode() {
        RemoteError::Malformed(err.to_string())
    } else {
        RemoteError::Network(err.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::Unauthorized),
        StatusCode::NOT_FOUND => Err(RemoteError::NotFound),
        _ => {
            let body = response.text().await.unwrap_or_default();
            let mut message = body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
            if body.chars().count() > MAX_ERROR_BODY_CHARS {
                message.push_str("...");
            }
            tracing::debug!(status = status.as_u16(), %message, "remote error response");
            Err(RemoteError::server(status.as_u16(), message))
        }
    }
}
