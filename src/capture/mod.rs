//! Voice capture: device access, encoding, and the turn state machine.

pub mod device;
pub mod encode;
pub mod machine;
pub mod state;

pub use device::{AudioChunk, AudioSource, CaptureHandle, CpalAudioSource, DEVICE_OPEN_TIMEOUT};
pub use encode::{EncodedRecording, encode_recording};
pub use machine::{CaptureStateMachine, LISTENING_PROMPT, ToggleOutcome, TriggerSource};
pub use state::{CaptureState, InvalidTransition};
