//! Shared-cadence polling of the live collections.
//!
//! A single interval ticks every kind together. Each kind has its own lane
//! with a re-entry guard, so a slow alerts fetch makes the next alerts tick
//! a no-op without delaying mail. Opening a panel fires one extra refresh
//! for that kind only and leaves the interval's phase alone.

use crate::gateway::RemoteGateway;
use crate::live::reconcile::{
    Interaction, ItemKind, ListItem, Patch, ReconciliationEngine, badge_visible,
};
use crate::runtime::{EventSink, ShellEvent};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReason {
    Scheduled,
    /// Off-cycle refresh fired by opening the panel.
    PanelOpened,
}

/// One scheduling unit for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTick {
    pub kind: ItemKind,
    pub requested_at: DateTime<Utc>,
    pub reason: TickReason,
}

impl PollTick {
    pub fn new(kind: ItemKind, reason: TickReason) -> Self {
        Self {
            kind,
            requested_at: Utc::now(),
            reason,
        }
    }
}

/// What a refresh did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneOutcome {
    /// A fetch for this kind was still outstanding.
    Skipped,
    /// The fetch failed; displayed rows were left untouched.
    Failed(String),
    /// Panel closed: only the badge count was refreshed.
    Counted { count: usize },
    /// Panel open: the patch was applied (possibly empty).
    Reconciled { patch: Patch },
}

/// Clears the lane's in-flight flag when the refresh ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn try_begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Lane {
    kind: ItemKind,
    in_flight: AtomicBool,
    panel_open: AtomicBool,
    /// Visible count from the last successful fetch.
    last_count: AtomicUsize,
    badge: AtomicBool,
    engine: Mutex<ReconciliationEngine>,
}

impl Lane {
    fn new(kind: ItemKind) -> Self {
        Self {
            kind,
            in_flight: AtomicBool::new(false),
            panel_open: AtomicBool::new(false),
            last_count: AtomicUsize::new(0),
            badge: AtomicBool::new(false),
            engine: Mutex::new(ReconciliationEngine::new(kind)),
        }
    }

    fn engine(&self) -> MutexGuard<'_, ReconciliationEngine> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct PollingScheduler {
    gateway: Arc<dyn RemoteGateway>,
    events: EventSink,
    interval: Duration,
    lanes: Vec<Lane>,
}

impl PollingScheduler {
    pub fn new(gateway: Arc<dyn RemoteGateway>, events: EventSink, interval: Duration) -> Self {
        Self {
            gateway,
            events,
            interval,
            lanes: ItemKind::ALL.into_iter().map(Lane::new).collect(),
        }
    }

    fn lane(&self, kind: ItemKind) -> &Lane {
        // `lanes` is built from `ItemKind::ALL`, so every kind has a lane.
        self.lanes
            .iter()
            .find(|lane| lane.kind == kind)
            .unwrap_or(&self.lanes[0])
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_panel_open(&self, kind: ItemKind) -> bool {
        self.lane(kind).panel_open.load(Ordering::Acquire)
    }

    pub fn is_fetching(&self, kind: ItemKind) -> bool {
        self.lane(kind).in_flight.load(Ordering::Acquire)
    }

    pub fn badge_visible(&self, kind: ItemKind) -> bool {
        self.lane(kind).badge.load(Ordering::Acquire)
    }

    /// Snapshot of the rows currently displayed for `kind`.
    pub fn displayed(&self, kind: ItemKind) -> Vec<ListItem> {
        self.lane(kind).engine().collection().items().to_vec()
    }

    pub fn interaction(&self, kind: ItemKind, id: &str) -> Option<Interaction> {
        self.lane(kind).engine().collection().interaction(id)
    }

    pub fn set_interaction(
        &self,
        kind: ItemKind,
        id: &str,
        interaction: Option<Interaction>,
    ) -> bool {
        self.lane(kind)
            .engine()
            .collection_mut()
            .set_interaction(id, interaction)
    }

    fn update_badge(&self, lane: &Lane) {
        let visible = badge_visible(
            lane.last_count.load(Ordering::Acquire),
            lane.panel_open.load(Ordering::Acquire),
        );
        if lane.badge.swap(visible, Ordering::AcqRel) != visible {
            self.events.emit(ShellEvent::BadgeChanged {
                kind: lane.kind,
                visible,
            });
        }
    }

    /// Fetch one kind and, if its panel is open, reconcile it.
    pub async fn refresh(&self, tick: PollTick) -> LaneOutcome {
        let lane = self.lane(tick.kind);
        let Some(_guard) = InFlight::try_begin(&lane.in_flight) else {
            debug!(kind = %tick.kind, "fetch still outstanding; tick skipped");
            return LaneOutcome::Skipped;
        };

        let incoming = match self.gateway.poll(tick.kind).await {
            Ok(items) => items,
            Err(e) => {
                warn!(kind = %tick.kind, error = %e, "poll failed; keeping last-known rows");
                return LaneOutcome::Failed(e.to_string());
            }
        };

        let outcome = {
            let mut engine = lane.engine();
            lane.last_count
                .store(engine.count_visible(&incoming), Ordering::Release);

            if lane.panel_open.load(Ordering::Acquire) {
                let patch = engine.reconcile(incoming);
                if !patch.is_empty() {
                    self.events.emit(ShellEvent::PanelPatch {
                        kind: tick.kind,
                        patch: patch.clone(),
                    });
                }
                if engine.collection().is_empty()
                    && (!patch.is_empty() || tick.reason == TickReason::PanelOpened)
                {
                    self.events.emit(ShellEvent::PanelEmpty {
                        kind: tick.kind,
                        message: tick.kind.empty_message().to_owned(),
                    });
                }
                LaneOutcome::Reconciled { patch }
            } else {
                LaneOutcome::Counted {
                    count: lane.last_count.load(Ordering::Acquire),
                }
            }
        };

        self.update_badge(lane);
        outcome
    }

    /// Fire one shared tick: a refresh per kind, each on its own task.
    pub fn tick(self: &Arc<Self>) -> Vec<JoinHandle<LaneOutcome>> {
        ItemKind::ALL
            .into_iter()
            .map(|kind| {
                let scheduler = Arc::clone(self);
                tokio::spawn(async move {
                    scheduler
                        .refresh(PollTick::new(kind, TickReason::Scheduled))
                        .await
                })
            })
            .collect()
    }

    /// Open a panel: hide its badge and fire an immediate refresh for it.
    pub fn open_panel(self: &Arc<Self>, kind: ItemKind) -> JoinHandle<LaneOutcome> {
        let lane = self.lane(kind);
        lane.panel_open.store(true, Ordering::Release);
        self.update_badge(lane);
        debug!(kind = %kind, "panel opened");

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler
                .refresh(PollTick::new(kind, TickReason::PanelOpened))
                .await
        })
    }

    /// Close a panel: stop patching it; ticks keep the badge count live.
    pub fn close_panel(&self, kind: ItemKind) {
        let lane = self.lane(kind);
        lane.panel_open.store(false, Ordering::Release);
        self.update_badge(lane);
        debug!(kind = %kind, "panel closed");
    }

    /// Optimistically remove an item and tell the backend in the background.
    ///
    /// Returns `None` when the id is not displayed. The backend call is not
    /// awaited by the caller; a failure does not restore the row and is
    /// reported as [`ShellEvent::TransientError`].
    pub fn dismiss(self: &Arc<Self>, kind: ItemKind, id: &str) -> Option<JoinHandle<()>> {
        let lane = self.lane(kind);
        {
            let mut engine = lane.engine();
            engine.dismiss(id)?;
            lane.last_count
                .store(engine.collection().len(), Ordering::Release);

            self.events.emit(ShellEvent::PanelPatch {
                kind,
                patch: Patch {
                    removals: vec![id.to_owned()],
                    insertions: Vec::new(),
                },
            });
            if engine.collection().is_empty() {
                self.events.emit(ShellEvent::PanelEmpty {
                    kind,
                    message: kind.empty_message().to_owned(),
                });
            }
        }
        self.update_badge(lane);
        info!(kind = %kind, id, "item dismissed");

        let gateway = Arc::clone(&self.gateway);
        let events = self.events.clone();
        let id = id.to_owned();
        Some(tokio::spawn(async move {
            if let Err(e) = gateway.dismiss(kind, &id).await {
                warn!(kind = %kind, id = %id, error = %e, "backend dismiss failed");
                events.emit(ShellEvent::TransientError {
                    kind,
                    message: format!("Couldn't dismiss on the server: {e}"),
                });
            }
        }))
    }

    /// Start the shared interval loop. The first tick fires immediately.
    pub fn run(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "polling scheduler started");
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("polling scheduler stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        drop(self.tick());
                    }
                }
            }
        })
    }
}
