use crate::helpers::{FakeGateway, alert, eventually, mail, wait_for_event};
use aide::gateway::RemoteGateway;
use aide::live::{Interaction, ItemKind, LaneOutcome, PollTick, PollingScheduler, TickReason};
use aide::runtime::{EventSink, ShellEvent, drain_events};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

fn scheduler(
    gateway: &Arc<FakeGateway>,
    interval: Duration,
) -> (Arc<PollingScheduler>, broadcast::Receiver<ShellEvent>) {
    let events = EventSink::default();
    let rx = events.subscribe();
    let gateway: Arc<dyn RemoteGateway> = gateway.clone();
    (
        Arc::new(PollingScheduler::new(gateway, events, interval)),
        rx,
    )
}

fn ids(scheduler: &PollingScheduler, kind: ItemKind) -> Vec<String> {
    scheduler
        .displayed(kind)
        .into_iter()
        .map(|item| item.id)
        .collect()
}

fn scheduled(kind: ItemKind) -> PollTick {
    PollTick::new(kind, TickReason::Scheduled)
}

#[tokio::test]
async fn open_panel_reconciles_removals_then_appends() {
    let gateway = FakeGateway::new();
    gateway.set_items(ItemKind::Alert, vec![alert("a"), alert("b")]);
    let (scheduler, mut rx) = scheduler(&gateway, Duration::from_secs(60));

    let outcome = scheduler.open_panel(ItemKind::Alert).await.unwrap();
    assert!(matches!(outcome, LaneOutcome::Reconciled { .. }));
    assert_eq!(ids(&scheduler, ItemKind::Alert), vec!["a", "b"]);
    drain_events(&mut rx);

    gateway.set_items(ItemKind::Alert, vec![alert("b"), alert("c")]);
    let LaneOutcome::Reconciled { patch } = scheduler.refresh(scheduled(ItemKind::Alert)).await
    else {
        panic!("open panel should reconcile");
    };
    assert_eq!(patch.removals, vec!["a".to_owned()]);
    assert_eq!(
        patch.insertions.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
        vec!["c"]
    );
    assert_eq!(ids(&scheduler, ItemKind::Alert), vec!["b", "c"]);

    let events = drain_events(&mut rx);
    assert!(events.contains(&ShellEvent::PanelPatch {
        kind: ItemKind::Alert,
        patch,
    }));
}

#[tokio::test]
async fn unchanged_source_produces_no_patch_event() {
    let gateway = FakeGateway::new();
    gateway.set_items(ItemKind::Mail, vec![mail("m1")]);
    let (scheduler, mut rx) = scheduler(&gateway, Duration::from_secs(60));
    scheduler.open_panel(ItemKind::Mail).await.unwrap();
    drain_events(&mut rx);

    let outcome = scheduler.refresh(scheduled(ItemKind::Mail)).await;
    let LaneOutcome::Reconciled { patch } = outcome else {
        panic!("expected reconcile");
    };
    assert!(patch.is_empty());
    assert!(
        drain_events(&mut rx)
            .iter()
            .all(|e| !matches!(e, ShellEvent::PanelPatch { .. }))
    );
}

#[tokio::test]
async fn closed_panel_only_updates_badge() {
    let gateway = FakeGateway::new();
    gateway.set_items(ItemKind::Alert, vec![alert("a")]);
    let (scheduler, mut rx) = scheduler(&gateway, Duration::from_secs(60));

    let outcome = scheduler.refresh(scheduled(ItemKind::Alert)).await;
    assert_eq!(outcome, LaneOutcome::Counted { count: 1 });
    assert!(scheduler.badge_visible(ItemKind::Alert));
    assert!(scheduler.displayed(ItemKind::Alert).is_empty());

    let events = drain_events(&mut rx);
    assert_eq!(
        events,
        vec![ShellEvent::BadgeChanged {
            kind: ItemKind::Alert,
            visible: true,
        }]
    );

    // Opening hides the badge even though items exist.
    scheduler.open_panel(ItemKind::Alert).await.unwrap();
    assert!(!scheduler.badge_visible(ItemKind::Alert));

    scheduler.close_panel(ItemKind::Alert);
    assert!(scheduler.badge_visible(ItemKind::Alert));

    gateway.set_items(ItemKind::Alert, Vec::new());
    scheduler.refresh(scheduled(ItemKind::Alert)).await;
    assert!(!scheduler.badge_visible(ItemKind::Alert));
}

#[tokio::test]
async fn fetch_failure_keeps_displayed_rows() {
    let gateway = FakeGateway::new();
    gateway.set_items(ItemKind::Alert, vec![alert("a"), alert("b")]);
    let (scheduler, mut rx) = scheduler(&gateway, Duration::from_secs(60));
    scheduler.open_panel(ItemKind::Alert).await.unwrap();
    drain_events(&mut rx);

    gateway.fail_polls(ItemKind::Alert, "connection refused");
    let outcome = scheduler.refresh(scheduled(ItemKind::Alert)).await;
    assert!(matches!(outcome, LaneOutcome::Failed(msg) if msg.contains("connection refused")));
    assert_eq!(ids(&scheduler, ItemKind::Alert), vec!["a", "b"]);
    assert!(drain_events(&mut rx).is_empty());
}

#[tokio::test]
async fn empty_result_shows_placeholder() {
    let gateway = FakeGateway::new();
    gateway.set_items(ItemKind::Alert, vec![alert("a")]);
    let (scheduler, mut rx) = scheduler(&gateway, Duration::from_secs(60));
    scheduler.open_panel(ItemKind::Alert).await.unwrap();
    drain_events(&mut rx);

    gateway.set_items(ItemKind::Alert, Vec::new());
    scheduler.refresh(scheduled(ItemKind::Alert)).await;
    assert!(scheduler.displayed(ItemKind::Alert).is_empty());
    assert!(drain_events(&mut rx).contains(&ShellEvent::PanelEmpty {
        kind: ItemKind::Alert,
        message: "No new alerts.".into(),
    }));
}

#[tokio::test]
async fn opening_an_empty_panel_shows_placeholder() {
    let gateway = FakeGateway::new();
    let (scheduler, mut rx) = scheduler(&gateway, Duration::from_secs(60));
    scheduler.open_panel(ItemKind::Mail).await.unwrap();
    assert!(drain_events(&mut rx).contains(&ShellEvent::PanelEmpty {
        kind: ItemKind::Mail,
        message: "No new mail.".into(),
    }));
}

#[tokio::test]
async fn tick_is_skipped_while_fetch_outstanding() {
    let gateway = FakeGateway::new();
    gateway.set_items(ItemKind::Alert, vec![alert("a")]);
    gateway.set_items(ItemKind::Mail, vec![mail("m1")]);
    gateway.hold_polls(ItemKind::Alert, true);
    let (scheduler, _rx) = scheduler(&gateway, Duration::from_secs(60));

    let slow = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.refresh(scheduled(ItemKind::Alert)).await })
    };
    eventually(|| scheduler.is_fetching(ItemKind::Alert)).await;

    assert_eq!(
        scheduler.refresh(scheduled(ItemKind::Alert)).await,
        LaneOutcome::Skipped
    );
    assert_eq!(gateway.poll_count(ItemKind::Alert), 1);

    // The other kind is not held back by the slow one.
    assert_eq!(
        scheduler.refresh(scheduled(ItemKind::Mail)).await,
        LaneOutcome::Counted { count: 1 }
    );

    gateway.hold_polls(ItemKind::Alert, false);
    assert_eq!(slow.await.unwrap(), LaneOutcome::Counted { count: 1 });
    assert!(!scheduler.is_fetching(ItemKind::Alert));
}

#[tokio::test]
async fn interaction_survives_on_kept_items_and_is_dropped_with_removed_ones() {
    let gateway = FakeGateway::new();
    gateway.set_items(ItemKind::Alert, vec![alert("a"), alert("b")]);
    let (scheduler, _rx) = scheduler(&gateway, Duration::from_secs(60));
    scheduler.open_panel(ItemKind::Alert).await.unwrap();

    assert!(scheduler.set_interaction(ItemKind::Alert, "a", Some(Interaction::ContextMenu)));
    assert!(scheduler.set_interaction(ItemKind::Alert, "b", Some(Interaction::Expanded)));

    gateway.set_items(ItemKind::Alert, vec![alert("a"), alert("c")]);
    scheduler.refresh(scheduled(ItemKind::Alert)).await;

    assert_eq!(
        scheduler.interaction(ItemKind::Alert, "a"),
        Some(Interaction::ContextMenu)
    );
    assert_eq!(scheduler.interaction(ItemKind::Alert, "b"), None);
    assert_eq!(ids(&scheduler, ItemKind::Alert), vec!["a", "c"]);
}

#[tokio::test]
async fn dismiss_is_optimistic_and_survives_backend_failure() {
    let gateway = FakeGateway::new();
    gateway.set_items(ItemKind::Alert, vec![alert("a"), alert("b")]);
    gateway.fail_dismiss("503 from agent");
    let (scheduler, mut rx) = scheduler(&gateway, Duration::from_secs(60));
    scheduler.open_panel(ItemKind::Alert).await.unwrap();
    drain_events(&mut rx);

    let call = scheduler.dismiss(ItemKind::Alert, "a").expect("a is displayed");
    // Row is gone before the backend call completes.
    assert_eq!(ids(&scheduler, ItemKind::Alert), vec!["b"]);
    call.await.unwrap();

    assert_eq!(
        *gateway.dismissed.lock().unwrap(),
        vec![(ItemKind::Alert, "a".to_owned())]
    );
    let error = wait_for_event(&mut rx, |e| matches!(e, ShellEvent::TransientError { .. })).await;
    assert!(matches!(error, ShellEvent::TransientError { kind: ItemKind::Alert, .. }));

    // The source still reports "a"; it must not come back.
    scheduler.refresh(scheduled(ItemKind::Alert)).await;
    assert_eq!(ids(&scheduler, ItemKind::Alert), vec!["b"]);

    assert!(scheduler.dismiss(ItemKind::Alert, "zzz").is_none());
}

#[tokio::test]
async fn dismiss_during_outstanding_poll_stays_dismissed() {
    let gateway = FakeGateway::new();
    gateway.set_items(ItemKind::Alert, vec![alert("a"), alert("b")]);
    let (scheduler, mut rx) = scheduler(&gateway, Duration::from_secs(60));
    scheduler.open_panel(ItemKind::Alert).await.unwrap();
    drain_events(&mut rx);

    // This poll began before the dismiss and will still report "a".
    gateway.hold_polls(ItemKind::Alert, true);
    let poll = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.refresh(scheduled(ItemKind::Alert)).await })
    };
    eventually(|| scheduler.is_fetching(ItemKind::Alert)).await;

    scheduler.dismiss(ItemKind::Alert, "a").unwrap().await.unwrap();
    assert_eq!(ids(&scheduler, ItemKind::Alert), vec!["b"]);

    gateway.hold_polls(ItemKind::Alert, false);
    let LaneOutcome::Reconciled { patch } = poll.await.unwrap() else {
        panic!("open panel should reconcile");
    };
    assert!(patch.is_empty());
    assert_eq!(ids(&scheduler, ItemKind::Alert), vec!["b"]);
    assert!(!scheduler.badge_visible(ItemKind::Alert));

    // Once the source forgets "a" and later re-reports it, it is a new item.
    gateway.set_items(ItemKind::Alert, vec![alert("b")]);
    scheduler.refresh(scheduled(ItemKind::Alert)).await;
    gateway.set_items(ItemKind::Alert, vec![alert("b"), alert("a")]);
    scheduler.refresh(scheduled(ItemKind::Alert)).await;
    assert_eq!(ids(&scheduler, ItemKind::Alert), vec!["b", "a"]);
}

#[tokio::test]
async fn opening_a_panel_keeps_the_shared_interval_phase() {
    let gateway = FakeGateway::new();
    let period = Duration::from_millis(400);
    let (scheduler, _rx) = scheduler(&gateway, period);
    let cancel = CancellationToken::new();
    let started = Instant::now();
    let handle = Arc::clone(&scheduler).run(cancel.clone());

    // First shared tick fires immediately.
    eventually(|| gateway.poll_count(ItemKind::Mail) == 1).await;

    // Late in the period, an extra tick for alerts only.
    tokio::time::sleep_until((started + Duration::from_millis(300)).into()).await;
    scheduler.open_panel(ItemKind::Alert).await.unwrap();
    assert_eq!(gateway.poll_count(ItemKind::Alert), 2);
    assert_eq!(gateway.poll_count(ItemKind::Mail), 1);

    // The next shared tick stays on the original schedule (~400 ms), not
    // a full period after the open (~700 ms).
    eventually(|| gateway.poll_count(ItemKind::Mail) == 2).await;
    assert!(
        started.elapsed() < Duration::from_millis(600),
        "shared tick drifted to {:?}",
        started.elapsed()
    );
    eventually(|| gateway.poll_count(ItemKind::Alert) == 3).await;

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn dismissing_last_item_shows_placeholder() {
    let gateway = FakeGateway::new();
    gateway.set_items(ItemKind::Mail, vec![mail("m1")]);
    let (scheduler, mut rx) = scheduler(&gateway, Duration::from_secs(60));
    scheduler.open_panel(ItemKind::Mail).await.unwrap();
    drain_events(&mut rx);

    scheduler.dismiss(ItemKind::Mail, "m1").unwrap().await.unwrap();
    let events = drain_events(&mut rx);
    assert!(events.contains(&ShellEvent::PanelEmpty {
        kind: ItemKind::Mail,
        message: "No new mail.".into(),
    }));
}

#[tokio::test]
async fn run_loop_ticks_every_kind_until_cancelled() {
    let gateway = FakeGateway::new();
    let (scheduler, _rx) = scheduler(&gateway, Duration::from_millis(20));
    let cancel = CancellationToken::new();
    let handle = Arc::clone(&scheduler).run(cancel.clone());

    eventually(|| {
        gateway.poll_count(ItemKind::Alert) >= 2 && gateway.poll_count(ItemKind::Mail) >= 2
    })
    .await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop stops on cancel")
        .unwrap();
}
