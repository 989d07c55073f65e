//! The voice-turn state machine.
//!
//! One toggle control drives the whole pipeline: pressed while idle it opens
//! the microphone, pressed while recording it runs
//! encode → upload → transcribe → deliver. Presses in any other state are
//! ignored. Every transition reports its [`CapturePhase`] to the
//! conversation, which owns the input gate and emits
//! [`ShellEvent::RecordTriggerEnabled`] for the view.

use crate::capture::device::{AudioChunk, AudioSource, CaptureHandle};
use crate::capture::encode::encode_recording;
use crate::capture::state::{CaptureState, advance};
use crate::conversation::{
    CapturePhase, ConversationController, TurnInput, VOICE_PLACEHOLDER,
};
use crate::gateway::RemoteGateway;
use crate::runtime::{EventSink, ShellEvent};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Prompt shown while the microphone is open.
pub const LISTENING_PROMPT: &str = "Listening… press again to stop.";

/// Where a toggle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// The on-screen record control.
    #[default]
    User,
    /// The global shortcut relayed by the host process.
    Shortcut,
}

/// What a single toggle press did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Microphone opened; now recording.
    Started,
    /// The device could not be acquired; back to idle.
    DeviceFailed(String),
    /// The full pipeline ran and the answer is in the transcript.
    Delivered,
    /// Encoding, upload or transcription failed; back to idle.
    Failed(String),
    /// The press arrived while the control is disabled.
    Ignored,
}

/// One recording, from device acquisition to delivery.
struct CaptureSession {
    /// Taken when the recording stops.
    handle: Option<Box<dyn CaptureHandle>>,
}

fn phase_of(state: CaptureState) -> CapturePhase {
    match state {
        CaptureState::Idle => CapturePhase::Idle,
        CaptureState::Recording => CapturePhase::Recording,
        _ => CapturePhase::Busy,
    }
}

#[derive(Default)]
struct CaptureInner {
    state: CaptureState,
    session: Option<CaptureSession>,
}

pub struct CaptureStateMachine {
    source: Arc<dyn AudioSource>,
    gateway: Arc<dyn RemoteGateway>,
    conversation: Arc<ConversationController>,
    events: EventSink,
    inner: Mutex<CaptureInner>,
}

impl CaptureStateMachine {
    pub fn new(
        source: Arc<dyn AudioSource>,
        gateway: Arc<dyn RemoteGateway>,
        conversation: Arc<ConversationController>,
        events: EventSink,
    ) -> Self {
        Self {
            source,
            gateway,
            conversation,
            events,
            inner: Mutex::new(CaptureInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CaptureState {
        self.lock().state
    }

    /// Whether the record control should currently accept presses.
    pub fn trigger_enabled(&self) -> bool {
        self.conversation.trigger_enabled()
    }

    /// Toggle semantics: start when idle, stop-and-process when recording.
    ///
    /// Returns once the press has been fully handled; for a stop press that
    /// includes the upload round trip.
    pub async fn toggle(&self, source: TriggerSource) -> ToggleOutcome {
        let state = self.state();
        match state {
            CaptureState::Idle => self.start_recording(source),
            CaptureState::Recording => self.stop_and_deliver(source).await,
            other => {
                debug!(state = %other, "record toggle ignored while pipeline is busy");
                ToggleOutcome::Ignored
            }
        }
    }

    fn transition(&self, inner: &mut CaptureInner, next: CaptureState) -> bool {
        let previous = inner.state;
        if let Err(e) = advance(&mut inner.state, next) {
            error!(error = %e, "capture state machine refused transition");
            return false;
        }
        debug!(from = %previous, to = %next, "capture transition");
        self.events
            .emit(ShellEvent::CaptureStateChanged { state: next });
        self.conversation.set_capture_phase(phase_of(next));
        true
    }

    /// `Failed → Idle`, dropping whatever the session still holds.
    fn fail_to_idle(&self, inner: &mut CaptureInner) {
        self.transition(inner, CaptureState::Failed);
        if let Some(session) = inner.session.take()
            && let Some(handle) = session.handle
        {
            drop(handle.finish());
        }
        self.transition(inner, CaptureState::Idle);
    }

    /// Open the device and enter `Recording`. Ignored unless idle and the
    /// input gate is open.
    ///
    /// Runs synchronously so a second press always observes `Recording`;
    /// the device open is bounded by
    /// [`DEVICE_OPEN_TIMEOUT`](crate::capture::device::DEVICE_OPEN_TIMEOUT).
    pub fn start_recording(&self, source: TriggerSource) -> ToggleOutcome {
        let mut inner = self.lock();
        if inner.state != CaptureState::Idle {
            return ToggleOutcome::Ignored;
        }
        if !self.conversation.set_capture_phase(CapturePhase::Recording) {
            debug!("record toggle ignored while a reply is pending");
            return ToggleOutcome::Ignored;
        }

        self.transition(&mut inner, CaptureState::Recording);
        self.conversation.activate();

        match self.source.open() {
            Ok(handle) => {
                inner.session = Some(CaptureSession {
                    handle: Some(handle),
                });
                self.events.emit(ShellEvent::CapturePrompt {
                    text: LISTENING_PROMPT.to_owned(),
                });
                if source == TriggerSource::Shortcut {
                    self.events.emit(ShellEvent::Notice {
                        title: "Recording Started".to_owned(),
                        message: "Press the shortcut again to stop.".to_owned(),
                    });
                }
                info!("voice recording started");
                ToggleOutcome::Started
            }
            Err(e) => {
                warn!(error = %e, "could not acquire capture device");
                let message = format!("Microphone unavailable: {e}");
                self.fail_to_idle(&mut inner);
                self.events.emit(ShellEvent::CapturePrompt {
                    text: message.clone(),
                });
                ToggleOutcome::DeviceFailed(message)
            }
        }
    }

    /// Release the device and run the recording through to delivery.
    /// Ignored unless recording.
    pub async fn stop_and_deliver(&self, source: TriggerSource) -> ToggleOutcome {
        // Recording → Encoding: release the device before anything else.
        let handle = {
            let mut inner = self.lock();
            if inner.state != CaptureState::Recording {
                return ToggleOutcome::Ignored;
            }
            self.transition(&mut inner, CaptureState::Encoding);
            if source == TriggerSource::Shortcut {
                self.events.emit(ShellEvent::Notice {
                    title: "Recording Stopped".to_owned(),
                    message: "Processing your voice command...".to_owned(),
                });
            }

            let Some(session) = inner.session.as_mut() else {
                error!("recording state without a session");
                self.fail_to_idle(&mut inner);
                return ToggleOutcome::Failed("recording session was lost".to_owned());
            };
            session.handle.take()
        };

        let chunks = match handle {
            Some(handle) => release_device(handle).await,
            None => Vec::new(),
        };
        debug!(chunks = chunks.len(), "capture device released");

        let encoded = match encode_recording(&chunks) {
            Ok(recording) => recording,
            Err(e) => {
                warn!(error = %e, "could not encode recording");
                let message = format!("Couldn't process the recording: {e}");
                let mut inner = self.lock();
                self.fail_to_idle(&mut inner);
                self.events.emit(ShellEvent::CapturePrompt {
                    text: message.clone(),
                });
                return ToggleOutcome::Failed(message);
            }
        };
        drop(chunks);

        // Encoding → Uploading: placeholder turn first, then the network call.
        let (ticket, payload) = {
            let mut inner = self.lock();
            let ticket = match self.conversation.begin_turn(TurnInput::Voice) {
                Ok(ticket) => ticket,
                Err(e) => {
                    error!(error = %e, "voice turn could not claim the input");
                    self.fail_to_idle(&mut inner);
                    return ToggleOutcome::Failed(e.to_string());
                }
            };
            self.transition(&mut inner, CaptureState::Uploading);
            (ticket, encoded.to_base64())
        };

        info!(
            bytes = encoded.wav.len(),
            duration_ms = encoded.duration.as_millis() as u64,
            "uploading voice message"
        );
        let reply = self.gateway.upload_audio(&payload).await;

        let mut inner = self.lock();
        match reply {
            Ok(reply) => {
                self.transition(&mut inner, CaptureState::Transcribed);
                let transcription = if reply.transcription.trim().is_empty() {
                    VOICE_PLACEHOLDER.trim_end_matches('…')
                } else {
                    reply.transcription.as_str()
                };
                self.conversation.update_user_turn(&ticket, transcription);

                self.transition(&mut inner, CaptureState::Delivered);
                self.conversation.deliver_reply(&ticket, &reply.final_answer);

                inner.session = None;
                self.transition(&mut inner, CaptureState::Idle);
                info!("voice turn delivered");
                ToggleOutcome::Delivered
            }
            Err(e) => {
                warn!(error = %e, "voice upload failed");
                let message = format!("Voice message failed: {e}");
                self.transition(&mut inner, CaptureState::Failed);
                self.conversation.fail_turn(&ticket, &message);
                inner.session = None;
                self.transition(&mut inner, CaptureState::Idle);
                ToggleOutcome::Failed(message)
            }
        }
    }
}

/// Stop the device on the blocking pool; joining the capture thread must not
/// stall a runtime worker.
async fn release_device(handle: Box<dyn CaptureHandle>) -> Vec<AudioChunk> {
    match tokio::task::spawn_blocking(move || handle.finish()).await {
        Ok(chunks) => chunks,
        Err(e) => {
            error!(error = %e, "capture release task failed");
            Vec::new()
        }
    }
}
