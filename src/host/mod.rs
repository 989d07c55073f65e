//! Host-facing command contract and transports.

pub mod channel;
pub mod contract;
pub mod stdio;

pub use channel::{HostCommandClient, HostCommandServer, ShellCommandHandler, command_channel};
pub use contract::{CommandEnvelope, CommandName, EVENT_VERSION, EventEnvelope, ResponseEnvelope};
pub use stdio::{run_bridge, run_stdio_bridge};
