//! Newline-delimited JSON bridge between the host process and the shell core.
//!
//! Reads `CommandEnvelope` lines, dispatches them through the command
//! router, and writes `ResponseEnvelope` and `EventEnvelope` lines back.
//! Over stdio, stdout is reserved for the protocol; diagnostics go to stderr.

use crate::error::{Result, ShellError};
use crate::host::channel::{
    HostCommandClient, ShellCommandHandler, command_channel, spawn_event_relay,
};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::runtime::EventSink;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

const REQUEST_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

type SharedWriter<W> = Arc<Mutex<W>>;

/// Run the bridge over this process's stdin/stdout.
///
/// # Errors
///
/// Returns [`ShellError::Channel`] when stdin or stdout fail.
pub async fn run_stdio_bridge<H: ShellCommandHandler>(handler: H, events: &EventSink) -> Result<()> {
    let reader = tokio::io::BufReader::new(tokio::io::stdin());
    let writer = tokio::io::BufWriter::new(tokio::io::stdout());
    run_bridge(reader, writer, handler, events).await
}

/// Run the bridge until the input closes or `runtime.stop` is answered.
///
/// Three tasks cooperate: the command reader (this task), the router, and
/// the event forwarder. Responses and events share one writer, so lines
/// never interleave.
///
/// # Errors
///
/// Returns [`ShellError::Channel`] on read or write failure.
pub async fn run_bridge<R, W, H>(reader: R, writer: W, handler: H, events: &EventSink) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    H: ShellCommandHandler,
{
    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let (client, server) = command_channel(REQUEST_CAPACITY, event_tx.clone(), handler);
    let writer: SharedWriter<W> = Arc::new(Mutex::new(writer));

    let server_handle = tokio::spawn(server.run());
    let mut event_rx = client.subscribe_events();
    let relay_handle = spawn_event_relay(events, event_tx);
    let forward_handle = {
        let writer = Arc::clone(&writer);
        tokio::spawn(async move { forward_events(&mut event_rx, &writer).await })
    };

    let result = run_reader(reader, client, &writer).await;

    relay_handle.abort();
    forward_handle.abort();
    let _ = relay_handle.await;
    let _ = forward_handle.await;
    let _ = server_handle.await;
    result
}

async fn forward_events<W: AsyncWrite + Unpin>(
    event_rx: &mut broadcast::Receiver<EventEnvelope>,
    writer: &SharedWriter<W>,
) {
    loop {
        match event_rx.recv().await {
            Ok(envelope) => {
                if let Err(e) = write_json(writer, &envelope).await {
                    warn!(error = %e, "cannot write event; stopping event forwarder");
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => {
                warn!(lagged = n, "event forwarder lagged; some events were dropped");
            }
            Err(RecvError::Closed) => {
                info!("event channel closed; stopping event forwarder");
                break;
            }
        }
    }
}

async fn run_reader<R, W>(
    mut reader: R,
    client: HostCommandClient,
    writer: &SharedWriter<W>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| ShellError::Channel(format!("failed to read command: {e}")))?;
        if read == 0 {
            info!("command input closed; shutting down bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, raw_line = %trimmed, "unparseable command envelope");
                let response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_json(writer, &response).await?;
                continue;
            }
        };

        let request_id = envelope.request_id.clone();
        let is_stop = envelope.command == CommandName::RuntimeStop;
        let response = match client.send(envelope).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "host command dispatch failed");
                ResponseEnvelope::error(request_id, e.to_string())
            }
        };
        write_json(writer, &response).await?;

        if is_stop && response.ok {
            info!("runtime.stop received; shutting down bridge");
            break;
        }
    }
    Ok(())
}

async fn write_json<W, T>(writer: &SharedWriter<W>, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_string(value)
        .map_err(|e| ShellError::Contract(format!("cannot serialize envelope: {e}")))?;
    json.push('\n');

    let mut w = writer.lock().await;
    w.write_all(json.as_bytes())
        .await
        .map_err(|e| ShellError::Channel(format!("failed to write envelope: {e}")))?;
    w.flush()
        .await
        .map_err(|e| ShellError::Channel(format!("failed to flush envelope: {e}")))?;
    Ok(())
}
