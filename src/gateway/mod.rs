//! Typed calls the shell makes to the remote agent process.
//!
//! Every call is a suspension point. Implementations report transport and
//! backend failures as `Err`; the callers in [`live`](crate::live),
//! [`capture`](crate::capture) and [`conversation`](crate::conversation)
//! decide how each failure shows up on screen.

pub mod http;

use crate::error::Result;
use crate::live::{ItemKind, ListItem};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use http::HttpGateway;

/// Result of a voice upload: what was heard and what the agent answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceReply {
    pub transcription: String,
    pub final_answer: String,
}

/// Full content of one mail item, fetched on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailDetail {
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

#[async_trait]
pub trait RemoteGateway: Send + Sync + 'static {
    /// Fetch the current items of one collection (`pollAlerts` / `pollMail`).
    async fn poll(&self, kind: ItemKind) -> Result<Vec<ListItem>>;

    /// Ask the backend to forget an item.
    async fn dismiss(&self, kind: ItemKind, id: &str) -> Result<()>;

    async fn mail_detail(&self, id: &str) -> Result<MailDetail>;

    /// Ship a base64 recording; one round trip covers transcription and answer.
    async fn upload_audio(&self, audio_base64: &str) -> Result<VoiceReply>;

    /// Send a typed turn and return the agent's final answer.
    async fn send_text(&self, text: &str) -> Result<String>;

    async fn start_new_session(&self) -> Result<()>;

    /// Deliver the user's yes/no decision for a confirmation prompt.
    async fn confirm(&self, request_id: &str, approved: bool) -> Result<()>;

    async fn open_file(&self, path: &str) -> Result<()>;

    async fn open_link(&self, url: &str) -> Result<()>;
}
