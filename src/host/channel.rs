//! Host command channel and router.
//!
//! The router validates each payload, hands the call to a
//! [`ShellCommandHandler`], and answers with a [`ResponseEnvelope`]. Handlers
//! must not block on the network: long work is spawned and reports back
//! through [`ShellEvent`]s, which [`spawn_event_relay`] turns into
//! [`EventEnvelope`]s for the host.

use crate::capture::TriggerSource;
use crate::confirm::ConfirmationPrompt;
use crate::conversation::Role;
use crate::error::{Result, ShellError};
use crate::host::contract::{
    CommandEnvelope, CommandName, EVENT_VERSION, EventEnvelope, ResponseEnvelope,
};
use crate::live::ItemKind;
use crate::runtime::{EventSink, ShellEvent};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// What the router can ask of the shell.
pub trait ShellCommandHandler: Send + Sync + 'static {
    fn toggle_recording(&self, source: TriggerSource) -> Result<()>;
    fn activate_chat(&self) -> Result<()>;
    fn send_chat(&self, text: &str) -> Result<()>;
    fn reset_chat(&self) -> Result<()>;
    fn load_history(&self, turns: Vec<(Role, String)>) -> Result<()>;
    fn open_panel(&self, kind: ItemKind) -> Result<()>;
    fn close_panel(&self, kind: ItemKind) -> Result<()>;
    /// Returns `false` when the id is not displayed.
    fn dismiss_item(&self, kind: ItemKind, id: &str) -> Result<bool>;
    fn open_mail(&self, id: &str) -> Result<()>;
    /// Returns the id of the new confirmation request.
    fn prompt_confirmation(&self, prompt: ConfirmationPrompt) -> Result<String>;
    fn respond_confirmation(&self, id: &str, approved: bool) -> Result<()>;
    fn relay_agent_status(&self, text: &str) -> Result<()>;
    fn open_file(&self, path: &str) -> Result<()>;
    fn open_link(&self, url: &str) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<ResponseEnvelope>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    /// # Errors
    ///
    /// [`ShellError::Contract`] for an invalid envelope, or
    /// [`ShellError::Channel`] if the server has gone away.
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate()?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| ShellError::Channel(format!("failed to send host command: {e}")))?;

        response_rx
            .await
            .map_err(|e| ShellError::Channel(format!("host command response dropped: {e}")))
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

pub struct HostCommandServer<H: ShellCommandHandler> {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    handler: H,
}

/// Create a client/server pair sharing `event_tx` for outbound events.
#[must_use]
pub fn command_channel<H: ShellCommandHandler>(
    request_capacity: usize,
    event_tx: broadcast::Sender<EventEnvelope>,
    handler: H,
) -> (HostCommandClient, HostCommandServer<H>) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));
    (
        HostCommandClient {
            request_tx,
            event_tx,
        },
        HostCommandServer {
            request_rx,
            handler,
        },
    )
}

impl<H: ShellCommandHandler> HostCommandServer<H> {
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            let response = self.dispatch(&request.envelope);
            let _ = request.response_tx.send(response);
        }
        debug!("host command server stopped");
    }

    /// Route and fold handler errors into an error response.
    pub fn dispatch(&self, envelope: &CommandEnvelope) -> ResponseEnvelope {
        match self.route(envelope) {
            Ok(payload) => ResponseEnvelope::ok(envelope.request_id.clone(), payload),
            Err(e) => {
                warn!(command = %envelope.command, error = %e, "host command rejected");
                ResponseEnvelope::error(envelope.request_id.clone(), e.to_string())
            }
        }
    }

    /// Route a command envelope to the handler; returns the response payload.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Contract`] for malformed payloads, or whatever
    /// the handler reports.
    pub fn route(&self, envelope: &CommandEnvelope) -> Result<Value> {
        let payload = &envelope.payload;
        let command = envelope.command;
        match command {
            CommandName::HostPing => Ok(json!({"pong": true})),
            CommandName::HostVersion => Ok(json!({
                "contract_version": EVENT_VERSION,
                "package_version": env!("CARGO_PKG_VERSION"),
            })),
            CommandName::RecordingToggle => {
                let source = parse_trigger_source(payload)?;
                self.handler.toggle_recording(source)?;
                Ok(json!({"accepted": true}))
            }
            CommandName::ChatActivate => {
                self.handler.activate_chat()?;
                Ok(json!({"accepted": true}))
            }
            CommandName::ChatSend => {
                let text = parse_non_empty_field(payload, "text", command)?;
                self.handler.send_chat(&text)?;
                Ok(json!({"accepted": true}))
            }
            CommandName::ChatReset => {
                self.handler.reset_chat()?;
                Ok(json!({"accepted": true}))
            }
            CommandName::ChatLoadHistory => {
                let turns = parse_history(payload)?;
                let count = turns.len();
                self.handler.load_history(turns)?;
                Ok(json!({"accepted": true, "turns": count}))
            }
            CommandName::PanelOpen => {
                let kind = parse_kind(payload, command)?;
                self.handler.open_panel(kind)?;
                Ok(json!({"accepted": true, "kind": kind}))
            }
            CommandName::PanelClose => {
                let kind = parse_kind(payload, command)?;
                self.handler.close_panel(kind)?;
                Ok(json!({"accepted": true, "kind": kind}))
            }
            CommandName::ItemDismiss => {
                let kind = parse_kind(payload, command)?;
                let id = parse_non_empty_field(payload, "id", command)?;
                let removed = self.handler.dismiss_item(kind, &id)?;
                Ok(json!({"accepted": true, "removed": removed}))
            }
            CommandName::MailOpen => {
                let id = parse_non_empty_field(payload, "id", command)?;
                self.handler.open_mail(&id)?;
                Ok(json!({"accepted": true}))
            }
            CommandName::ConfirmationPrompt => {
                let prompt: ConfirmationPrompt = serde_json::from_value(payload.clone())
                    .map_err(|e| ShellError::Contract(format!("{command}: {e}")))?;
                let id = self.handler.prompt_confirmation(prompt)?;
                Ok(json!({"accepted": true, "id": id}))
            }
            CommandName::ConfirmationRespond => {
                let id = parse_non_empty_field(payload, "id", command)?;
                let approved = parse_bool_field(payload, "approved", command)?;
                self.handler.respond_confirmation(&id, approved)?;
                Ok(json!({"accepted": true, "approved": approved}))
            }
            CommandName::AgentStatus => {
                let text = parse_non_empty_field(payload, "text", command)?;
                self.handler.relay_agent_status(&text)?;
                Ok(json!({"accepted": true}))
            }
            CommandName::FileOpen => {
                let path = parse_non_empty_field(payload, "path", command)?;
                self.handler.open_file(&path)?;
                Ok(json!({"accepted": true}))
            }
            CommandName::LinkOpen => {
                let url = parse_link(payload)?;
                self.handler.open_link(&url)?;
                Ok(json!({"accepted": true}))
            }
            CommandName::RuntimeStop => {
                self.handler.stop()?;
                Ok(json!({"accepted": true}))
            }
        }
    }
}

/// Wrap a core event for the host wire.
///
/// # Errors
///
/// [`ShellError::Contract`] if the event cannot be serialized.
pub fn event_envelope(event: &ShellEvent) -> Result<EventEnvelope> {
    let payload = serde_json::to_value(event)
        .map_err(|e| ShellError::Contract(format!("cannot serialize {}: {e}", event.name())))?;
    Ok(EventEnvelope::new(
        uuid::Uuid::new_v4().to_string(),
        event.name(),
        payload,
    ))
}

/// Forward every [`ShellEvent`] from `events` onto `event_tx` until the sink closes.
pub fn spawn_event_relay(
    events: &EventSink,
    event_tx: broadcast::Sender<EventEnvelope>,
) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event_envelope(&event) {
                    Ok(envelope) => {
                        let _ = event_tx.send(envelope);
                    }
                    Err(e) => error!(error = %e, "dropping unserializable event"),
                },
                Err(RecvError::Lagged(n)) => {
                    warn!(lagged = n, "event relay lagged; some events were dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn parse_non_empty_field(payload: &Value, field: &str, command: CommandName) -> Result<String> {
    let Some(raw) = payload.get(field).and_then(Value::as_str) else {
        return Err(ShellError::Contract(format!(
            "{command} requires payload.{field}"
        )));
    };
    let value = raw.trim();
    if value.is_empty() {
        return Err(ShellError::Contract(format!(
            "{command} requires a non-empty payload.{field}"
        )));
    }
    Ok(value.to_owned())
}

fn parse_bool_field(payload: &Value, field: &str, command: CommandName) -> Result<bool> {
    payload
        .get(field)
        .and_then(Value::as_bool)
        .ok_or_else(|| ShellError::Contract(format!("{command} requires payload.{field} (boolean)")))
}

fn parse_kind(payload: &Value, command: CommandName) -> Result<ItemKind> {
    let raw = parse_non_empty_field(payload, "kind", command)?;
    ItemKind::parse(&raw).ok_or_else(|| {
        ShellError::Contract(format!(
            "{command}: unsupported kind `{raw}` (expected alert/mail)"
        ))
    })
}

fn parse_trigger_source(payload: &Value) -> Result<TriggerSource> {
    match payload.get("source") {
        None | Some(Value::Null) => Ok(TriggerSource::User),
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|_| {
            ShellError::Contract(format!(
                "recording.toggle: unsupported source {raw} (expected user/shortcut)"
            ))
        }),
    }
}

fn parse_history(payload: &Value) -> Result<Vec<(Role, String)>> {
    let Some(entries) = payload.get("turns").and_then(Value::as_array) else {
        return Err(ShellError::Contract(
            "chat.load_history requires payload.turns (array)".to_owned(),
        ));
    };
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let role = entry
                .get("role")
                .cloned()
                .and_then(|r| serde_json::from_value::<Role>(r).ok())
                .ok_or_else(|| {
                    ShellError::Contract(format!(
                        "chat.load_history: turns[{i}].role must be user or assistant"
                    ))
                })?;
            let text = entry
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ShellError::Contract(format!("chat.load_history: turns[{i}].text missing"))
                })?;
            Ok((role, text.to_owned()))
        })
        .collect()
}

const ALLOWED_LINK_SCHEMES: &[&str] = &["http://", "https://", "mailto:"];

fn parse_link(payload: &Value) -> Result<String> {
    let url = parse_non_empty_field(payload, "url", CommandName::LinkOpen)?;
    let lower = url.to_ascii_lowercase();
    if !ALLOWED_LINK_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return Err(ShellError::Contract(format!(
            "link.open: unsupported URL scheme in `{url}` (allowed: http, https, mailto)"
        )));
    }
    Ok(url)
}
