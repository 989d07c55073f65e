//! Versioned command/event envelopes exchanged with the native host.

use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Commands the host can send to the shell core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.version")]
    HostVersion,
    #[serde(rename = "recording.toggle")]
    RecordingToggle,
    #[serde(rename = "chat.activate")]
    ChatActivate,
    #[serde(rename = "chat.send")]
    ChatSend,
    #[serde(rename = "chat.reset")]
    ChatReset,
    #[serde(rename = "chat.load_history")]
    ChatLoadHistory,
    #[serde(rename = "panel.open")]
    PanelOpen,
    #[serde(rename = "panel.close")]
    PanelClose,
    #[serde(rename = "item.dismiss")]
    ItemDismiss,
    #[serde(rename = "mail.open")]
    MailOpen,
    #[serde(rename = "confirmation.prompt")]
    ConfirmationPrompt,
    #[serde(rename = "confirmation.respond")]
    ConfirmationRespond,
    #[serde(rename = "agent.status")]
    AgentStatus,
    #[serde(rename = "file.open")]
    FileOpen,
    #[serde(rename = "link.open")]
    LinkOpen,
    #[serde(rename = "runtime.stop")]
    RuntimeStop,
}

impl CommandName {
    pub const ALL: [CommandName; 17] = [
        Self::HostPing,
        Self::HostVersion,
        Self::RecordingToggle,
        Self::ChatActivate,
        Self::ChatSend,
        Self::ChatReset,
        Self::ChatLoadHistory,
        Self::PanelOpen,
        Self::PanelClose,
        Self::ItemDismiss,
        Self::MailOpen,
        Self::ConfirmationPrompt,
        Self::ConfirmationRespond,
        Self::AgentStatus,
        Self::FileOpen,
        Self::LinkOpen,
        Self::RuntimeStop,
    ];

    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostVersion => "host.version",
            Self::RecordingToggle => "recording.toggle",
            Self::ChatActivate => "chat.activate",
            Self::ChatSend => "chat.send",
            Self::ChatReset => "chat.reset",
            Self::ChatLoadHistory => "chat.load_history",
            Self::PanelOpen => "panel.open",
            Self::PanelClose => "panel.close",
            Self::ItemDismiss => "item.dismiss",
            Self::MailOpen => "mail.open",
            Self::ConfirmationPrompt => "confirmation.prompt",
            Self::ConfirmationRespond => "confirmation.respond",
            Self::AgentStatus => "agent.status",
            Self::FileOpen => "file.open",
            Self::LinkOpen => "link.open",
            Self::RuntimeStop => "runtime.stop",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == raw)
    }
}

impl std::fmt::Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A versioned command envelope from host -> shell core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    ///
    /// # Errors
    ///
    /// Returns a [`ContractError`] for a version mismatch or a blank
    /// `request_id`.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::UnsupportedVersion {
                got: self.v,
                expected: EVENT_VERSION,
            });
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::InvalidEnvelope(
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Reply to exactly one [`CommandEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Unsolicited notification from the shell core to the host view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("unsupported contract version {got}; expected {expected}")]
    UnsupportedVersion { got: u32, expected: u32 },
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}

impl From<ContractError> for crate::error::ShellError {
    fn from(e: ContractError) -> Self {
        Self::Contract(e.to_string())
    }
}
