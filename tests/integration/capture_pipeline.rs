use crate::helpers::{FakeAudio, FakeGateway, eventually};
use aide::capture::{AudioSource, CaptureState, CaptureStateMachine, ToggleOutcome, TriggerSource};
use aide::conversation::{ConversationController, Role};
use aide::error::ShellError;
use aide::gateway::{RemoteGateway, VoiceReply};
use aide::runtime::{EventSink, ShellEvent, drain_events};
use base64::Engine as _;
use std::sync::Arc;
use tokio::sync::broadcast;

struct Rig {
    gateway: Arc<FakeGateway>,
    audio: Arc<FakeAudio>,
    conversation: Arc<ConversationController>,
    capture: Arc<CaptureStateMachine>,
    rx: broadcast::Receiver<ShellEvent>,
}

fn rig_with(audio: Arc<FakeAudio>) -> Rig {
    let gateway = FakeGateway::new();
    let events = EventSink::default();
    let rx = events.subscribe();
    let remote: Arc<dyn RemoteGateway> = gateway.clone();
    let source: Arc<dyn AudioSource> = audio.clone();
    let conversation = Arc::new(ConversationController::new(
        Arc::clone(&remote),
        events.clone(),
    ));
    let capture = Arc::new(CaptureStateMachine::new(
        source,
        remote,
        Arc::clone(&conversation),
        events,
    ));
    Rig {
        gateway,
        audio,
        conversation,
        capture,
        rx,
    }
}

fn rig() -> Rig {
    rig_with(FakeAudio::new())
}

fn states(events: &[ShellEvent]) -> Vec<CaptureState> {
    events
        .iter()
        .filter_map(|e| match e {
            ShellEvent::CaptureStateChanged { state } => Some(*state),
            _ => None,
        })
        .collect()
}

fn gate_events(events: &[ShellEvent]) -> (Vec<bool>, Vec<bool>) {
    let mut input = Vec::new();
    let mut trigger = Vec::new();
    for event in events {
        match event {
            ShellEvent::InputEnabled { enabled } => input.push(*enabled),
            ShellEvent::RecordTriggerEnabled { enabled } => trigger.push(*enabled),
            _ => {}
        }
    }
    (input, trigger)
}

/// Start recording, then stop on a spawned task and wait until the upload is in flight.
async fn hold_in_upload(rig: &Rig) -> tokio::task::JoinHandle<ToggleOutcome> {
    rig.gateway.hold_replies(true);
    rig.capture.toggle(TriggerSource::User).await;
    let stop = {
        let capture = Arc::clone(&rig.capture);
        tokio::spawn(async move { capture.toggle(TriggerSource::User).await })
    };
    eventually(|| rig.capture.state() == CaptureState::Uploading).await;
    stop
}

fn transcript_texts(conversation: &ConversationController) -> Vec<(Role, String)> {
    conversation
        .transcript()
        .turns()
        .iter()
        .map(|t| (t.role, t.text.clone()))
        .collect()
}

#[tokio::test]
async fn voice_turn_runs_end_to_end() {
    let mut rig = rig();

    assert_eq!(
        rig.capture.toggle(TriggerSource::User).await,
        ToggleOutcome::Started
    );
    assert_eq!(rig.capture.state(), CaptureState::Recording);
    assert!(rig.audio.held());
    assert!(rig.capture.trigger_enabled());
    assert!(rig.conversation.is_chat_active());

    assert_eq!(
        rig.capture.toggle(TriggerSource::User).await,
        ToggleOutcome::Delivered
    );
    assert_eq!(rig.capture.state(), CaptureState::Idle);
    assert!(!rig.audio.held());
    assert!(rig.conversation.input_enabled());

    assert_eq!(
        transcript_texts(&rig.conversation),
        vec![
            (Role::User, "what's the weather".to_owned()),
            (Role::Assistant, "Sunny".to_owned()),
        ]
    );

    let events = drain_events(&mut rig.rx);
    assert_eq!(
        states(&events),
        vec![
            CaptureState::Recording,
            CaptureState::Encoding,
            CaptureState::Uploading,
            CaptureState::Transcribed,
            CaptureState::Delivered,
            CaptureState::Idle,
        ]
    );
    assert!(
        events
            .iter()
            .all(|e| !matches!(e, ShellEvent::Notice { .. })),
        "on-screen toggles show no notices"
    );

    // The upload is base64 WAV.
    let uploads = rig.gateway.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    let wav = base64::engine::general_purpose::STANDARD
        .decode(&uploads[0])
        .unwrap();
    assert_eq!(&wav[..4], b"RIFF");
}

#[tokio::test]
async fn device_failure_returns_to_idle_without_a_turn() {
    let mut rig = rig();
    rig.audio.fail_with("permission denied");

    let outcome = rig.capture.toggle(TriggerSource::User).await;
    assert!(matches!(outcome, ToggleOutcome::DeviceFailed(ref m) if m.contains("permission denied")));
    assert_eq!(rig.capture.state(), CaptureState::Idle);
    assert!(rig.conversation.transcript().is_empty());

    let events = drain_events(&mut rig.rx);
    assert_eq!(
        states(&events),
        vec![
            CaptureState::Recording,
            CaptureState::Failed,
            CaptureState::Idle
        ]
    );
    assert!(events.iter().any(|e| matches!(
        e,
        ShellEvent::CapturePrompt { text } if text.starts_with("Microphone unavailable")
    )));
}

#[tokio::test]
async fn upload_failure_rewrites_placeholder_and_unlocks_input() {
    let rig = rig();
    rig.gateway
        .set_voice_reply(Err("transcription service down".into()));

    rig.capture.toggle(TriggerSource::User).await;
    let outcome = rig.capture.toggle(TriggerSource::User).await;
    assert!(matches!(outcome, ToggleOutcome::Failed(_)));

    assert_eq!(rig.capture.state(), CaptureState::Idle);
    assert!(!rig.audio.held());
    assert!(rig.conversation.input_enabled());

    let turns = transcript_texts(&rig.conversation);
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].0, Role::User);
    assert!(turns[0].1.starts_with("Voice message failed"));
    assert!(turns[0].1.contains("transcription service down"));

    // The next typed message goes through.
    rig.conversation.send_text("are you there?").await.unwrap();
    let turns = transcript_texts(&rig.conversation);
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[1], (Role::User, "are you there?".to_owned()));
    assert_eq!(turns[2], (Role::Assistant, "Hello there".to_owned()));
    assert!(rig.conversation.input_enabled());
}

#[tokio::test]
async fn recording_disables_text_input_until_idle() {
    let mut rig = rig();

    rig.capture.toggle(TriggerSource::User).await;
    assert!(!rig.conversation.input_enabled());
    assert!(rig.capture.trigger_enabled());
    assert!(matches!(
        rig.conversation.submit_text("typed while recording"),
        Err(ShellError::InputLocked)
    ));

    rig.capture.toggle(TriggerSource::User).await;
    assert!(rig.conversation.input_enabled());
    assert!(rig.capture.trigger_enabled());

    let (input, trigger) = gate_events(&drain_events(&mut rig.rx));
    assert_eq!(input, vec![false, true]);
    assert_eq!(trigger, vec![false, true]);
}

#[tokio::test]
async fn reset_during_upload_keeps_input_closed_and_drops_late_reply() {
    let mut rig = rig();
    let stop = hold_in_upload(&rig).await;
    drain_events(&mut rig.rx);

    rig.conversation.reset();
    assert!(rig.conversation.transcript().is_empty());
    assert!(!rig.conversation.input_enabled());
    assert!(!rig.capture.trigger_enabled());
    assert!(matches!(
        rig.conversation.submit_text("hello"),
        Err(ShellError::InputLocked)
    ));
    let (input, _) = gate_events(&drain_events(&mut rig.rx));
    assert!(input.is_empty(), "reset must not reopen input mid-upload");

    rig.gateway.hold_replies(false);
    stop.await.unwrap();
    assert_eq!(rig.capture.state(), CaptureState::Idle);
    assert!(rig.conversation.transcript().is_empty());
    assert!(rig.conversation.input_enabled());

    let (input, trigger) = gate_events(&drain_events(&mut rig.rx));
    assert_eq!(input, vec![true]);
    assert_eq!(trigger, vec![true]);

    rig.conversation.send_text("hello").await.unwrap();
    assert_eq!(rig.conversation.transcript().len(), 2);
}

#[tokio::test]
async fn history_loaded_during_upload_is_not_polluted_by_the_reply() {
    let rig = rig();
    let stop = hold_in_upload(&rig).await;

    let history = vec![
        (Role::User, "earlier question".to_owned()),
        (Role::Assistant, "earlier answer".to_owned()),
    ];
    rig.conversation.load_history(history.clone());
    assert!(!rig.conversation.awaiting_reply());
    assert!(!rig.conversation.input_enabled());

    rig.gateway.hold_replies(false);
    stop.await.unwrap();

    assert_eq!(transcript_texts(&rig.conversation), history);
    assert!(rig.conversation.input_enabled());
}

#[tokio::test]
async fn history_loaded_before_a_failed_upload_stays_intact() {
    let rig = rig();
    rig.gateway
        .set_voice_reply(Err("transcription service down".into()));
    let stop = hold_in_upload(&rig).await;

    let history = vec![(Role::Assistant, "welcome back".to_owned())];
    rig.conversation.load_history(history.clone());

    rig.gateway.hold_replies(false);
    assert!(matches!(stop.await.unwrap(), ToggleOutcome::Failed(_)));
    assert_eq!(transcript_texts(&rig.conversation), history);
    assert!(rig.conversation.input_enabled());
    assert_eq!(rig.capture.state(), CaptureState::Idle);
}

#[tokio::test]
async fn empty_recording_fails_before_upload() {
    let mut rig = rig_with(FakeAudio::silent());

    rig.capture.toggle(TriggerSource::User).await;
    let outcome = rig.capture.toggle(TriggerSource::User).await;
    assert!(matches!(outcome, ToggleOutcome::Failed(_)));

    assert!(rig.gateway.uploads.lock().unwrap().is_empty());
    assert!(rig.conversation.transcript().is_empty());
    assert!(!rig.audio.held());

    let events = drain_events(&mut rig.rx);
    assert_eq!(
        states(&events),
        vec![
            CaptureState::Recording,
            CaptureState::Encoding,
            CaptureState::Failed,
            CaptureState::Idle,
        ]
    );
}

#[tokio::test]
async fn presses_during_upload_are_ignored() {
    let rig = rig();
    rig.gateway.hold_replies(true);

    rig.capture.toggle(TriggerSource::User).await;
    let stop = {
        let capture = Arc::clone(&rig.capture);
        tokio::spawn(async move { capture.toggle(TriggerSource::User).await })
    };
    eventually(|| rig.capture.state() == CaptureState::Uploading).await;

    // Device already released; placeholder visible; control disabled.
    assert!(!rig.audio.held());
    assert!(!rig.capture.trigger_enabled());
    assert_eq!(
        transcript_texts(&rig.conversation),
        vec![(Role::User, "Voice message…".to_owned())]
    );
    assert_eq!(
        rig.capture.toggle(TriggerSource::User).await,
        ToggleOutcome::Ignored
    );

    rig.gateway.hold_replies(false);
    assert_eq!(stop.await.unwrap(), ToggleOutcome::Delivered);
    assert_eq!(rig.audio.acquired.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn recording_cannot_start_while_text_reply_pending() {
    let mut rig = rig();
    rig.gateway.hold_replies(true);

    let pending = rig.conversation.submit_text("hello").unwrap().unwrap();
    assert!(!rig.capture.trigger_enabled());
    assert_eq!(
        rig.capture.toggle(TriggerSource::User).await,
        ToggleOutcome::Ignored
    );
    assert!(!rig.audio.held());
    assert!(drain_events(&mut rig.rx).contains(&ShellEvent::RecordTriggerEnabled { enabled: false }));

    rig.gateway.hold_replies(false);
    pending.await.unwrap();
    assert!(rig.capture.trigger_enabled());
    assert!(drain_events(&mut rig.rx).contains(&ShellEvent::RecordTriggerEnabled { enabled: true }));
}

#[tokio::test]
async fn shortcut_toggles_emit_notices() {
    let mut rig = rig();
    rig.capture.toggle(TriggerSource::Shortcut).await;
    rig.capture.toggle(TriggerSource::Shortcut).await;

    let titles: Vec<String> = drain_events(&mut rig.rx)
        .into_iter()
        .filter_map(|e| match e {
            ShellEvent::Notice { title, .. } => Some(title),
            _ => None,
        })
        .collect();
    assert_eq!(titles, vec!["Recording Started", "Recording Stopped"]);
}

#[tokio::test]
async fn blank_transcription_falls_back_to_label() {
    let rig = rig();
    rig.gateway.set_voice_reply(Ok(VoiceReply {
        transcription: "  ".into(),
        final_answer: "I couldn't make that out.".into(),
    }));

    rig.capture.toggle(TriggerSource::User).await;
    assert_eq!(
        rig.capture.toggle(TriggerSource::User).await,
        ToggleOutcome::Delivered
    );
    assert_eq!(
        transcript_texts(&rig.conversation),
        vec![
            (Role::User, "Voice message".to_owned()),
            (Role::Assistant, "I couldn't make that out.".to_owned()),
        ]
    );
}
