//! Events emitted by the core for the rendering adapter.
//!
//! The core never touches a rendering surface. Every visible change is an
//! event; whoever renders (the stdio bridge, a test) subscribes to the sink.

use crate::capture::CaptureState;
use crate::conversation::Turn;
use crate::gateway::MailDetail;
use crate::live::{ItemKind, Patch};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the event broadcast channel.
pub const EVENT_CAPACITY: usize = 256;

/// Everything the core asks the view layer to show.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShellEvent {
    /// Drop `patch.removals`, then append `patch.insertions`.
    PanelPatch { kind: ItemKind, patch: Patch },
    /// The panel has no rows; show the placeholder text.
    PanelEmpty { kind: ItemKind, message: String },
    BadgeChanged { kind: ItemKind, visible: bool },
    /// Short-lived error toast; displayed data is unchanged.
    TransientError { kind: ItemKind, message: String },
    CaptureStateChanged { state: CaptureState },
    /// Text shown in place of the "listening" prompt.
    CapturePrompt { text: String },
    RecordTriggerEnabled { enabled: bool },
    TurnAppended { turn: Turn },
    /// A turn's text changed in place (placeholder resolution).
    TurnUpdated { turn: Turn },
    TranscriptCleared,
    InputEnabled { enabled: bool },
    ChatActive { active: bool },
    ConfirmationRequested {
        id: String,
        title: String,
        action: String,
        args: serde_json::Value,
        rationale: String,
    },
    ConfirmationResolved { id: String, approved: bool },
    /// Desktop-style notice (shortcut feedback).
    Notice { title: String, message: String },
    /// Progress line relayed from the remote agent.
    AgentStatus { text: String },
    MailDetail { detail: MailDetail },
}

impl ShellEvent {
    /// Dotted event name used on the host wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PanelPatch { .. } => "panel.patch",
            Self::PanelEmpty { .. } => "panel.empty",
            Self::BadgeChanged { .. } => "panel.badge",
            Self::TransientError { .. } => "panel.error",
            Self::CaptureStateChanged { .. } => "capture.state",
            Self::CapturePrompt { .. } => "capture.prompt",
            Self::RecordTriggerEnabled { .. } => "capture.trigger",
            Self::TurnAppended { .. } => "transcript.appended",
            Self::TurnUpdated { .. } => "transcript.updated",
            Self::TranscriptCleared => "transcript.cleared",
            Self::InputEnabled { .. } => "input.enabled",
            Self::ChatActive { .. } => "chat.active",
            Self::ConfirmationRequested { .. } => "confirmation.requested",
            Self::ConfirmationResolved { .. } => "confirmation.resolved",
            Self::Notice { .. } => "notice",
            Self::AgentStatus { .. } => "agent.status",
            Self::MailDetail { .. } => "mail.detail",
        }
    }
}

/// Cloneable fan-out handle for [`ShellEvent`]s.
///
/// Emitting never fails: with no subscriber the event is simply dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<ShellEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: ShellEvent) {
        if self.tx.send(event).is_err() {
            trace!("no event subscribers; event dropped");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ShellEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

/// Drain every event currently buffered in `rx` without waiting.
pub fn drain_events(rx: &mut broadcast::Receiver<ShellEvent>) -> Vec<ShellEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
