//! Chat transcript, the single pending-turn slot, and the input gate.
//!
//! Both the typed-text path and the voice pipeline go through
//! [`ConversationController::begin_turn`], and the capture pipeline reports
//! its phase here, so the input surface and the record trigger have exactly
//! one owner. Their enabled state is derived from the pending slot and the
//! capture phase, and `InputEnabled` / `RecordTriggerEnabled` are emitted
//! whenever either value changes.

use crate::error::{Result, ShellError};
use crate::gateway::RemoteGateway;
use crate::runtime::{EventSink, ShellEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Text shown for a voice turn until its transcription arrives.
pub const VOICE_PLACEHOLDER: &str = "Voice message…";

/// Fallback for failures that carry no usable message.
const GENERIC_FAILURE: &str = "Something went wrong while processing your message.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Opaque handle to one transcript entry. Never reused, even across resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnRef(u64);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub id: TurnRef,
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
    next_id: u64,
}

impl Transcript {
    pub fn push(&mut self, role: Role, text: impl Into<String>) -> TurnRef {
        let id = TurnRef(self.next_id);
        self.next_id += 1;
        self.turns.push(Turn {
            id,
            role,
            text: text.into(),
            at: Utc::now(),
        });
        id
    }

    /// Rewrite a turn's text without moving it.
    pub fn replace_text(&mut self, id: TurnRef, text: impl Into<String>) -> Option<&Turn> {
        let turn = self.turns.iter_mut().find(|t| t.id == id)?;
        turn.text = text.into();
        Some(turn)
    }

    pub fn get(&self, id: TurnRef) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == id)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// What started the pending turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    Text(String),
    /// A voice turn; the user entry holds [`VOICE_PLACEHOLDER`] until transcribed.
    Voice,
}

/// The in-flight exchange gating the input surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub input: TurnInput,
    pub user_turn: TurnRef,
    pub awaiting_reply: bool,
}

/// Proof of ownership of the pending slot.
///
/// A ticket goes stale when the conversation is reset; completions carrying
/// a stale ticket are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTicket {
    epoch: u64,
    user_turn: TurnRef,
}

impl TurnTicket {
    pub fn user_turn(&self) -> TurnRef {
        self.user_turn
    }
}

/// How far the voice pipeline has taken the input surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePhase {
    #[default]
    Idle,
    /// Microphone open; the record trigger stops the recording.
    Recording,
    /// Encoding, uploading or finishing; nothing accepts input.
    Busy,
}

#[derive(Debug)]
struct ConversationState {
    chat_active: bool,
    transcript: Transcript,
    pending: Option<PendingTurn>,
    /// Bumped on reset and history load to invalidate outstanding tickets.
    epoch: u64,
    capture: CapturePhase,
    /// Last values sent to the view.
    input_shown: bool,
    trigger_shown: bool,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            chat_active: false,
            transcript: Transcript::default(),
            pending: None,
            epoch: 0,
            capture: CapturePhase::Idle,
            input_shown: true,
            trigger_shown: true,
        }
    }
}

impl ConversationState {
    fn awaiting_reply(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| p.awaiting_reply)
    }

    fn input_open(&self) -> bool {
        self.capture == CapturePhase::Idle && !self.awaiting_reply()
    }

    fn trigger_open(&self) -> bool {
        match self.capture {
            CapturePhase::Idle => !self.awaiting_reply(),
            CapturePhase::Recording => true,
            CapturePhase::Busy => false,
        }
    }

    /// Drop the pending slot and orphan its ticket.
    fn abandon_pending(&mut self) {
        self.epoch += 1;
        self.pending = None;
    }

    fn owns(&self, ticket: &TurnTicket) -> bool {
        ticket.epoch == self.epoch
            && self
                .pending
                .as_ref()
                .is_some_and(|p| p.user_turn == ticket.user_turn)
    }
}

pub struct ConversationController {
    gateway: Arc<dyn RemoteGateway>,
    events: EventSink,
    state: Mutex<ConversationState>,
}

impl ConversationController {
    pub fn new(gateway: Arc<dyn RemoteGateway>, events: EventSink) -> Self {
        Self {
            gateway,
            events,
            state: Mutex::new(ConversationState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_chat_active(&self) -> bool {
        self.lock().chat_active
    }

    pub fn awaiting_reply(&self) -> bool {
        self.lock().awaiting_reply()
    }

    /// The input surface is enabled only while no reply is awaited and the
    /// voice pipeline is idle.
    pub fn input_enabled(&self) -> bool {
        self.lock().input_open()
    }

    /// Whether the record control accepts presses: always while recording,
    /// never while the pipeline is busy, otherwise like the input surface.
    pub fn trigger_enabled(&self) -> bool {
        self.lock().trigger_open()
    }

    pub fn capture_phase(&self) -> CapturePhase {
        self.lock().capture
    }

    /// Report the voice pipeline's phase.
    ///
    /// Entering `Recording` from `Idle` is refused (returns `false`) while a
    /// reply is pending; the check and the claim happen under one lock so a
    /// text send cannot slip in between.
    pub fn set_capture_phase(&self, phase: CapturePhase) -> bool {
        let mut state = self.lock();
        if phase == CapturePhase::Recording
            && state.capture == CapturePhase::Idle
            && state.awaiting_reply()
        {
            return false;
        }
        state.capture = phase;
        self.sync_gates(&mut state);
        true
    }

    fn sync_gates(&self, state: &mut ConversationState) {
        let input = state.input_open();
        if input != state.input_shown {
            state.input_shown = input;
            self.events.emit(ShellEvent::InputEnabled { enabled: input });
        }
        let trigger = state.trigger_open();
        if trigger != state.trigger_shown {
            state.trigger_shown = trigger;
            self.events
                .emit(ShellEvent::RecordTriggerEnabled { enabled: trigger });
        }
    }

    pub fn pending(&self) -> Option<PendingTurn> {
        self.lock().pending.clone()
    }

    pub fn transcript(&self) -> Transcript {
        self.lock().transcript.clone()
    }

    /// Mark chat active (typed focus, recording start, host "activate chat").
    pub fn activate(&self) {
        let mut state = self.lock();
        self.set_active(&mut state, true);
    }

    fn set_active(&self, state: &mut ConversationState, active: bool) {
        if state.chat_active != active {
            state.chat_active = active;
            self.events.emit(ShellEvent::ChatActive { active });
        }
    }

    /// Claim the pending slot and add the user's entry to the transcript.
    ///
    /// # Errors
    ///
    /// [`ShellError::InputLocked`] when another turn is still awaiting its
    /// reply, or for a text turn while the voice pipeline holds the input.
    pub fn begin_turn(&self, input: TurnInput) -> Result<TurnTicket> {
        let mut state = self.lock();
        if state.awaiting_reply() {
            warn!("turn submitted while a reply is pending; input gate was bypassed");
            return Err(ShellError::InputLocked);
        }
        if matches!(input, TurnInput::Text(_)) && state.capture != CapturePhase::Idle {
            warn!(phase = ?state.capture, "text submitted during voice capture; input gate was bypassed");
            return Err(ShellError::InputLocked);
        }

        self.set_active(&mut state, true);

        let text = match &input {
            TurnInput::Text(text) => text.clone(),
            TurnInput::Voice => VOICE_PLACEHOLDER.to_owned(),
        };
        let user_turn = state.transcript.push(Role::User, text);
        state.pending = Some(PendingTurn {
            input,
            user_turn,
            awaiting_reply: true,
        });

        if let Some(turn) = state.transcript.get(user_turn).cloned() {
            self.events.emit(ShellEvent::TurnAppended { turn });
        }
        self.sync_gates(&mut state);

        Ok(TurnTicket {
            epoch: state.epoch,
            user_turn,
        })
    }

    /// Replace the user entry of the pending turn in place.
    pub fn update_user_turn(&self, ticket: &TurnTicket, text: &str) -> bool {
        let mut state = self.lock();
        if !state.owns(ticket) {
            debug!("ignoring update for stale turn");
            return false;
        }
        let updated = state
            .transcript
            .replace_text(ticket.user_turn, text)
            .cloned();
        match updated {
            Some(turn) => {
                self.events.emit(ShellEvent::TurnUpdated { turn });
                true
            }
            None => false,
        }
    }

    /// Response-display path shared by text and voice turns.
    ///
    /// Appends the assistant entry, clears the pending slot and re-enables
    /// input. Returns `false` if the ticket is stale.
    pub fn deliver_reply(&self, ticket: &TurnTicket, answer: &str) -> bool {
        let mut state = self.lock();
        if !state.owns(ticket) {
            debug!("dropping reply for stale turn");
            return false;
        }
        let reply = state.transcript.push(Role::Assistant, answer);
        if let Some(turn) = state.transcript.get(reply).cloned() {
            self.events.emit(ShellEvent::TurnAppended { turn });
        }
        self.release(&mut state);
        true
    }

    /// Finish the pending turn with an error message.
    ///
    /// A voice turn has its placeholder rewritten with the message; a text
    /// turn keeps the user's words and gets an assistant entry carrying the
    /// message. Input is re-enabled either way.
    pub fn fail_turn(&self, ticket: &TurnTicket, message: &str) -> bool {
        let mut state = self.lock();
        if !state.owns(ticket) {
            debug!("dropping failure for stale turn");
            return false;
        }
        let message = if message.trim().is_empty() {
            GENERIC_FAILURE
        } else {
            message
        };

        let is_voice = state
            .pending
            .as_ref()
            .is_some_and(|p| p.input == TurnInput::Voice);
        if is_voice {
            if let Some(turn) = state
                .transcript
                .replace_text(ticket.user_turn, message)
                .cloned()
            {
                self.events.emit(ShellEvent::TurnUpdated { turn });
            }
        } else {
            let entry = state.transcript.push(Role::Assistant, message);
            if let Some(turn) = state.transcript.get(entry).cloned() {
                self.events.emit(ShellEvent::TurnAppended { turn });
            }
        }
        self.release(&mut state);
        true
    }

    fn release(&self, state: &mut ConversationState) {
        state.pending = None;
        self.sync_gates(state);
    }

    /// Send a typed turn and wait for the answer.
    ///
    /// Blank text is ignored. Gateway failures are written into the
    /// transcript rather than returned.
    ///
    /// # Errors
    ///
    /// [`ShellError::InputLocked`] when a reply is already pending.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring blank chat input");
            return Ok(());
        }
        let ticket = self.begin_turn(TurnInput::Text(text.to_owned()))?;
        self.complete_text(ticket, text).await;
        Ok(())
    }

    /// Like [`send_text`](Self::send_text), but the turn is claimed before
    /// returning and the round trip runs on a spawned task.
    ///
    /// Returns `None` for blank input.
    ///
    /// # Errors
    ///
    /// [`ShellError::InputLocked`] when a reply is already pending.
    pub fn submit_text(self: &Arc<Self>, text: &str) -> Result<Option<JoinHandle<()>>> {
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring blank chat input");
            return Ok(None);
        }
        let ticket = self.begin_turn(TurnInput::Text(text.to_owned()))?;
        let this = Arc::clone(self);
        let text = text.to_owned();
        Ok(Some(tokio::spawn(async move {
            this.complete_text(ticket, &text).await;
        })))
    }

    async fn complete_text(&self, ticket: TurnTicket, text: &str) {
        info!(chars = text.chars().count(), "sending text turn");
        match self.gateway.send_text(text).await {
            Ok(answer) => {
                self.deliver_reply(&ticket, &answer);
            }
            Err(e) => {
                warn!(error = %e, "text turn failed");
                self.fail_turn(&ticket, &format!("Sorry, I couldn't reach the assistant: {e}"));
            }
        }
    }

    /// Replace the transcript with previously stored turns.
    ///
    /// Like a reset, an outstanding reply is orphaned so it cannot land in
    /// the loaded history.
    pub fn load_history(&self, turns: Vec<(Role, String)>) {
        let mut state = self.lock();
        if state.pending.is_some() {
            info!("history loaded over a pending turn; its reply will be dropped");
        }
        state.abandon_pending();
        state.transcript.clear();
        self.events.emit(ShellEvent::TranscriptCleared);
        for (role, text) in turns {
            let id = state.transcript.push(role, text);
            if let Some(turn) = state.transcript.get(id).cloned() {
                self.events.emit(ShellEvent::TurnAppended { turn });
            }
        }
        self.sync_gates(&mut state);
        self.set_active(&mut state, true);
    }

    /// Back/reset: deactivate chat, clear everything, start a new backend session.
    ///
    /// An outstanding reply is orphaned; its late completion is ignored.
    pub fn reset(&self) {
        {
            let mut state = self.lock();
            state.abandon_pending();
            state.transcript.clear();
            self.events.emit(ShellEvent::TranscriptCleared);
            // Input stays closed while the voice pipeline still runs.
            self.sync_gates(&mut state);
            self.set_active(&mut state, false);
        }
        info!("conversation reset; starting new backend session");

        let gateway = Arc::clone(&self.gateway);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = gateway.start_new_session().await {
                        warn!(error = %e, "failed to start new backend session");
                    }
                });
            }
            Err(_) => warn!("no async runtime; new backend session not requested"),
        }
    }
}
