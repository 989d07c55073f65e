//! The assembled shell core.
//!
//! [`Shell`] owns one of each controller, wires them to a shared
//! [`EventSink`], and answers host commands. Nothing here blocks on the
//! network: round trips run on spawned tasks and report through events.

use crate::capture::{AudioSource, CaptureState, CaptureStateMachine, CpalAudioSource, TriggerSource};
use crate::config::ShellConfig;
use crate::confirm::{ConfirmationBroker, ConfirmationPrompt};
use crate::conversation::{ConversationController, Role};
use crate::error::Result;
use crate::gateway::{HttpGateway, RemoteGateway};
use crate::host::ShellCommandHandler;
use crate::live::{ItemKind, PollingScheduler};
use crate::runtime::{EventSink, ShellEvent};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Shell {
    events: EventSink,
    gateway: Arc<dyn RemoteGateway>,
    conversation: Arc<ConversationController>,
    capture: Arc<CaptureStateMachine>,
    scheduler: Arc<PollingScheduler>,
    confirmations: Arc<ConfirmationBroker>,
    cancel: CancellationToken,
}

impl Shell {
    /// Assemble the core around an explicit gateway and audio source.
    pub fn new(
        config: &ShellConfig,
        gateway: Arc<dyn RemoteGateway>,
        audio: Arc<dyn AudioSource>,
        events: EventSink,
    ) -> Self {
        let conversation = Arc::new(ConversationController::new(
            Arc::clone(&gateway),
            events.clone(),
        ));
        let capture = Arc::new(CaptureStateMachine::new(
            audio,
            Arc::clone(&gateway),
            Arc::clone(&conversation),
            events.clone(),
        ));
        let scheduler = Arc::new(PollingScheduler::new(
            Arc::clone(&gateway),
            events.clone(),
            config.polling.interval(),
        ));
        let confirmations = Arc::new(ConfirmationBroker::new(
            Arc::clone(&gateway),
            events.clone(),
            config.confirmation.timeout(),
        ));

        Self {
            events,
            gateway,
            conversation,
            capture,
            scheduler,
            confirmations,
            cancel: CancellationToken::new(),
        }
    }

    /// Production wiring: HTTP gateway and the cpal microphone.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Config`](crate::ShellError::Config) for invalid settings, or
    /// [`ShellError::Gateway`](crate::ShellError::Gateway) if the HTTP client cannot be built.
    pub fn from_config(config: &ShellConfig) -> Result<Self> {
        config.validate()?;
        let gateway: Arc<dyn RemoteGateway> = Arc::new(HttpGateway::new(&config.gateway)?);
        let audio: Arc<dyn AudioSource> = Arc::new(CpalAudioSource::new(&config.audio));
        Ok(Self::new(config, gateway, audio, EventSink::default()))
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn conversation(&self) -> &Arc<ConversationController> {
        &self.conversation
    }

    pub fn capture(&self) -> &Arc<CaptureStateMachine> {
        &self.capture
    }

    pub fn scheduler(&self) -> &Arc<PollingScheduler> {
        &self.scheduler
    }

    pub fn confirmations(&self) -> &Arc<ConfirmationBroker> {
        &self.confirmations
    }

    /// Token cancelled by `runtime.stop` or [`shutdown`](Self::shutdown).
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start background polling. The loop ends when the shell is stopped.
    pub fn start(&self) -> JoinHandle<()> {
        Arc::clone(&self.scheduler).run(self.cancel.child_token())
    }

    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("shell shutting down");
            self.cancel.cancel();
        }
    }

    /// Run a fire-and-forget gateway call; failures are only logged.
    fn relay<F>(&self, what: &'static str, call: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = call.await {
                warn!(error = %e, "{what} failed");
            }
        });
    }
}

impl ShellCommandHandler for Shell {
    fn toggle_recording(&self, source: TriggerSource) -> Result<()> {
        match self.capture.state() {
            // Started inline so a quick second press always sees `Recording`.
            CaptureState::Idle => {
                let outcome = self.capture.start_recording(source);
                debug!(?outcome, "record toggle handled");
            }
            CaptureState::Recording => {
                let capture = Arc::clone(&self.capture);
                tokio::spawn(async move {
                    let outcome = capture.stop_and_deliver(source).await;
                    debug!(?outcome, "voice pipeline finished");
                });
            }
            other => debug!(state = %other, "record toggle ignored while pipeline is busy"),
        }
        Ok(())
    }

    fn activate_chat(&self) -> Result<()> {
        self.conversation.activate();
        Ok(())
    }

    fn send_chat(&self, text: &str) -> Result<()> {
        self.conversation.submit_text(text)?;
        Ok(())
    }

    fn reset_chat(&self) -> Result<()> {
        self.conversation.reset();
        Ok(())
    }

    fn load_history(&self, turns: Vec<(Role, String)>) -> Result<()> {
        self.conversation.load_history(turns);
        Ok(())
    }

    fn open_panel(&self, kind: ItemKind) -> Result<()> {
        drop(self.scheduler.open_panel(kind));
        Ok(())
    }

    fn close_panel(&self, kind: ItemKind) -> Result<()> {
        self.scheduler.close_panel(kind);
        Ok(())
    }

    fn dismiss_item(&self, kind: ItemKind, id: &str) -> Result<bool> {
        Ok(self.scheduler.dismiss(kind, id).is_some())
    }

    fn open_mail(&self, id: &str) -> Result<()> {
        let gateway = Arc::clone(&self.gateway);
        let events = self.events.clone();
        let id = id.to_owned();
        tokio::spawn(async move {
            match gateway.mail_detail(&id).await {
                Ok(detail) => events.emit(ShellEvent::MailDetail { detail }),
                Err(e) => {
                    warn!(id = %id, error = %e, "mail detail fetch failed");
                    events.emit(ShellEvent::TransientError {
                        kind: ItemKind::Mail,
                        message: format!("Couldn't open the message: {e}"),
                    });
                }
            }
        });
        Ok(())
    }

    fn prompt_confirmation(&self, prompt: ConfirmationPrompt) -> Result<String> {
        let (id, _decision) = self.confirmations.prompt(prompt);
        Ok(id)
    }

    fn respond_confirmation(&self, id: &str, approved: bool) -> Result<()> {
        self.confirmations.respond(id, approved)
    }

    fn relay_agent_status(&self, text: &str) -> Result<()> {
        self.events.emit(ShellEvent::AgentStatus {
            text: text.to_owned(),
        });
        Ok(())
    }

    fn open_file(&self, path: &str) -> Result<()> {
        let gateway = Arc::clone(&self.gateway);
        let path = path.to_owned();
        self.relay("open file", async move { gateway.open_file(&path).await });
        Ok(())
    }

    fn open_link(&self, url: &str) -> Result<()> {
        let gateway = Arc::clone(&self.gateway);
        let url = url.to_owned();
        self.relay("open link", async move { gateway.open_link(&url).await });
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}
