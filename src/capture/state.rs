//! Lifecycle states of a voice capture session.

use serde::{Deserialize, Serialize};

/// Where a capture session currently is.
///
/// `Idle` is both the start and the end point; every other state is left
/// at most once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    #[default]
    Idle,
    /// The device is open and chunks are being buffered.
    Recording,
    /// The device has been released; chunks are being assembled.
    Encoding,
    /// The payload is on the wire and a placeholder turn is pending.
    Uploading,
    /// The placeholder turn now carries the transcription.
    Transcribed,
    /// The final answer reached the transcript.
    Delivered,
    Failed,
}

impl CaptureState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Encoding => "encoding",
            Self::Uploading => "uploading",
            Self::Transcribed => "transcribed",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: CaptureState) -> bool {
        use CaptureState::*;
        matches!(
            (self, next),
            (Idle, Recording)
                | (Recording, Encoding)
                | (Recording, Failed)
                | (Encoding, Uploading)
                | (Encoding, Failed)
                | (Uploading, Transcribed)
                | (Uploading, Failed)
                | (Transcribed, Delivered)
                | (Delivered, Idle)
                | (Failed, Idle)
        )
    }

    /// Whether the record/stop control accepts a press in this state.
    #[must_use]
    pub fn accepts_toggle(self) -> bool {
        matches!(self, Self::Idle | Self::Recording)
    }

    /// Whether a session exists (anything but `Idle`).
    #[must_use]
    pub fn is_active(self) -> bool {
        self != Self::Idle
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected transition, carried for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal capture transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: CaptureState,
    pub to: CaptureState,
}

/// Apply a transition in place, refusing illegal ones.
pub fn advance(state: &mut CaptureState, next: CaptureState) -> Result<(), InvalidTransition> {
    if !state.can_transition_to(next) {
        return Err(InvalidTransition {
            from: *state,
            to: next,
        });
    }
    *state = next;
    Ok(())
}
