//! JSON-over-HTTP gateway to the local agent process.

use crate::config::GatewayConfig;
use crate::error::{Result, ShellError};
use crate::gateway::{MailDetail, RemoteGateway, VoiceReply};
use crate::live::{ItemKind, ListItem};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ChatReply {
    final_answer: String,
}

/// [`RemoteGateway`] backed by `reqwest`.
pub struct HttpGateway {
    base_url: String,
    client: reqwest::Client,
    upload_timeout: Duration,
}

impl HttpGateway {
    /// # Errors
    ///
    /// Returns [`ShellError::Gateway`] if the HTTP client cannot be built.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            client,
            upload_timeout: config.upload_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.client.get(self.url(path)).send().await?;
        let response = check_status(response, path).await?;
        Ok(response.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = check_status(request.send().await?, path).await?;
        Ok(response.json().await?)
    }

    /// POST where only the status matters; the body is ignored.
    async fn post_unit(&self, path: &str, body: &Value) -> Result<()> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        check_status(response, path).await?;
        Ok(())
    }
}

fn collection_path(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Alert => "/alerts",
        ItemKind::Mail => "/mail",
    }
}

async fn check_status(response: reqwest::Response, path: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail: String = body.chars().take(200).collect();
    warn!(%status, path, "gateway returned an error status");
    Err(ShellError::Gateway(if detail.is_empty() {
        format!("{path} returned HTTP {status}")
    } else {
        format!("{path} returned HTTP {status}: {detail}")
    }))
}

/// Render a JSON value as display text; strings are taken verbatim.
fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn object_fields(object: &Map<String, Value>) -> BTreeMap<String, String> {
    object
        .iter()
        .filter(|(key, _)| key.as_str() != "id")
        .map(|(key, value)| (key.clone(), field_text(value)))
        .collect()
}

fn object_id(object: &Map<String, Value>) -> Option<String> {
    match object.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Convert a poll response into list items. Entries without an id are skipped.
pub(crate) fn items_from_wire(kind: ItemKind, raw: Vec<Value>) -> Vec<ListItem> {
    raw.into_iter()
        .filter_map(|entry| {
            let Value::Object(object) = entry else {
                warn!(kind = %kind, "non-object entry in poll response skipped");
                return None;
            };
            let Some(id) = object_id(&object) else {
                warn!(kind = %kind, "poll entry without an id skipped");
                return None;
            };
            Some(ListItem {
                id,
                kind,
                display_fields: object_fields(&object),
            })
        })
        .collect()
}

fn fetch_error(kind: ItemKind, e: ShellError) -> ShellError {
    match e {
        ShellError::Gateway(detail) => ShellError::Fetch(format!("{kind}: {detail}")),
        other => other,
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn poll(&self, kind: ItemKind) -> Result<Vec<ListItem>> {
        let raw: Vec<Value> = self
            .get_json(collection_path(kind))
            .await
            .map_err(|e| fetch_error(kind, e))?;
        let items = items_from_wire(kind, raw);
        debug!(kind = %kind, count = items.len(), "poll returned");
        Ok(items)
    }

    async fn dismiss(&self, kind: ItemKind, id: &str) -> Result<()> {
        let path = format!(
            "{}/{}/dismiss",
            collection_path(kind),
            urlencoding::encode(id)
        );
        self.post_unit(&path, &json!({}))
            .await
            .map_err(|e| fetch_error(kind, e))
    }

    async fn mail_detail(&self, id: &str) -> Result<MailDetail> {
        let path = format!("/mail/{}", urlencoding::encode(id));
        let raw: Value = self.get_json(&path).await?;
        let Value::Object(object) = raw else {
            return Err(ShellError::Gateway(format!(
                "{path} did not return an object"
            )));
        };
        Ok(MailDetail {
            id: object_id(&object).unwrap_or_else(|| id.to_owned()),
            fields: object_fields(&object),
        })
    }

    async fn upload_audio(&self, audio_base64: &str) -> Result<VoiceReply> {
        self.post_json(
            "/voice",
            &json!({ "audio_base64": audio_base64 }),
            Some(self.upload_timeout),
        )
        .await
    }

    async fn send_text(&self, text: &str) -> Result<String> {
        let reply: ChatReply = self
            .post_json("/chat", &json!({ "text": text }), Some(self.upload_timeout))
            .await?;
        Ok(reply.final_answer)
    }

    async fn start_new_session(&self) -> Result<()> {
        self.post_unit("/session/new", &json!({})).await
    }

    async fn confirm(&self, request_id: &str, approved: bool) -> Result<()> {
        let path = format!("/confirmations/{}", urlencoding::encode(request_id));
        self.post_unit(&path, &json!({ "approved": approved })).await
    }

    async fn open_file(&self, path: &str) -> Result<()> {
        self.post_unit("/open/file", &json!({ "path": path })).await
    }

    async fn open_link(&self, url: &str) -> Result<()> {
        self.post_unit("/open/link", &json!({ "url": url })).await
    }
}
