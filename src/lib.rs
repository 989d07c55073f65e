//! Aide: client core for a desktop assistant shell.
//!
//! The core keeps two live collections (alerts and mail) in step with a
//! local agent process, drives push-to-talk voice turns through
//! capture → encode → upload → transcribe → deliver, and owns the chat
//! transcript with its single-pending-turn input gate.
//!
//! # Architecture
//!
//! - **Live**: `PollingScheduler` ticks every kind on one interval and feeds
//!   a `ReconciliationEngine` per kind, which emits id-keyed patches.
//! - **Capture**: `CaptureStateMachine` owns the microphone via `cpal` and
//!   hands a WAV payload to the gateway.
//! - **Conversation**: `ConversationController` holds the transcript and the
//!   pending turn.
//! - **Gateway**: `RemoteGateway` is the async seam to the agent process
//!   (`HttpGateway` in production).
//! - **Host**: a newline-delimited JSON bridge that turns host commands into
//!   calls and core `ShellEvent`s into event envelopes.

pub mod capture;
pub mod config;
pub mod confirm;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod host;
pub mod live;
pub mod runtime;
pub mod shell;

pub use config::ShellConfig;
pub use error::{Result, ShellError};
pub use runtime::{EventSink, ShellEvent};
pub use shell::Shell;
