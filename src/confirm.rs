//! Yes/no confirmations requested by the remote agent.
//!
//! The agent asks before running sensitive actions. A prompt stays pending
//! until the user answers or the timeout lapses, in which case the answer is
//! "no". Either way the decision goes back through the gateway.

use crate::error::{Result, ShellError};
use crate::gateway::RemoteGateway;
use crate::runtime::{EventSink, ShellEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the agent wants to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationPrompt {
    pub title: String,
    pub action: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub rationale: String,
}

/// A prompt waiting on the user.
pub struct ConfirmationRequest {
    pub id: String,
    pub prompt: ConfirmationPrompt,
    respond_to: oneshot::Sender<bool>,
}

impl ConfirmationRequest {
    /// Returns `true` if the waiter was still listening.
    pub fn respond(self, approved: bool) -> bool {
        self.respond_to.send(approved).is_ok()
    }
}

pub struct ConfirmationBroker {
    gateway: Arc<dyn RemoteGateway>,
    events: EventSink,
    timeout: Duration,
    pending: Mutex<HashMap<String, ConfirmationRequest>>,
}

impl ConfirmationBroker {
    pub fn new(gateway: Arc<dyn RemoteGateway>, events: EventSink, timeout: Duration) -> Self {
        Self {
            gateway,
            events,
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, ConfirmationRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Register a prompt and wait for the answer on a background task.
    ///
    /// Returns the new request id and the task resolving to the decision.
    pub fn prompt(self: &Arc<Self>, prompt: ConfirmationPrompt) -> (String, JoinHandle<bool>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        let requested = ShellEvent::ConfirmationRequested {
            id: id.clone(),
            title: prompt.title.clone(),
            action: prompt.action.clone(),
            args: prompt.args.clone(),
            rationale: prompt.rationale.clone(),
        };
        info!(id = %id, action = %prompt.action, "confirmation requested");

        // Registered before the view hears about it, so an instant answer lands.
        self.pending().insert(
            id.clone(),
            ConfirmationRequest {
                id: id.clone(),
                prompt,
                respond_to: tx,
            },
        );
        self.events.emit(requested);

        let broker = Arc::clone(self);
        let waiter_id = id.clone();
        let handle = tokio::spawn(async move { broker.await_decision(waiter_id, rx).await });
        (id, handle)
    }

    async fn await_decision(&self, id: String, rx: oneshot::Receiver<bool>) -> bool {
        let approved = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(approved)) => approved,
            Ok(Err(_)) => {
                debug!(id = %id, "confirmation dropped without an answer");
                false
            }
            Err(_) => {
                info!(id = %id, "confirmation timed out; treating as no");
                self.pending().remove(&id);
                false
            }
        };

        if let Err(e) = self.gateway.confirm(&id, approved).await {
            warn!(id = %id, error = %e, "could not deliver confirmation decision");
        }
        self.events
            .emit(ShellEvent::ConfirmationResolved { id, approved });
        approved
    }

    /// Answer a pending prompt.
    ///
    /// # Errors
    ///
    /// [`ShellError::Contract`] when `id` is unknown or already resolved.
    pub fn respond(&self, id: &str, approved: bool) -> Result<()> {
        let request = self
            .pending()
            .remove(id)
            .ok_or_else(|| ShellError::Contract(format!("no pending confirmation '{id}'")))?;
        if !request.respond(approved) {
            warn!(id, "confirmation waiter already gone");
        }
        Ok(())
    }
}
