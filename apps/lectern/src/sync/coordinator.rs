use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::config::MonitorConfig;
use crate::offload::OffloadManager;
use crate::protocol::{EventMessage, event_type, outbound};
use crate::session::multiplexer::{ConnectionMultiplexer, SubscriptionId};
use crate::session::ConnectionState;
use crate::sync::cadence::{CadenceController, CadenceStats, RefreshReason};
use crate::sync::priority::{RankedView, rank_teams};
use crate::sync::reconciler::{ReconcileOutcome, RosterReconciler};
use crate::sync::SnapshotFetcher;
use crate::transport::Transport;

enum SyncSignal {
    Refresh(RefreshReason),
    ReRank,
}

/// The coordinator tying the core together: owns the multiplexer, reconciler,
/// cadence controller, and offload manager; routes push events into the
/// roster; drives the full-refresh backstop; publishes the ranked view over a
/// watch channel. Constructed explicitly and passed by reference — one
/// connection, many subscribers, no module-level state.
pub struct MonitorSync {
    config: MonitorConfig,
    multiplexer: Arc<ConnectionMultiplexer>,
    reconciler: Arc<RosterReconciler>,
    cadence: Arc<CadenceController>,
    offload: Arc<OffloadManager>,
    fetcher: Arc<dyn SnapshotFetcher>,
    view_tx: watch::Sender<RankedView>,
    signal_tx: mpsc::UnboundedSender<SyncSignal>,
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncSignal>>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl MonitorSync {
    pub fn new(
        transport: Arc<dyn Transport>,
        fetcher: Arc<dyn SnapshotFetcher>,
        config: MonitorConfig,
    ) -> Self {
        let multiplexer = Arc::new(ConnectionMultiplexer::new(
            transport,
            config.reconnect.clone(),
        ));
        let cadence = Arc::new(CadenceController::new(config.cadence.clone()));
        let (view_tx, _) = watch::channel(RankedView::default());
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            config,
            multiplexer,
            reconciler: Arc::new(RosterReconciler::new()),
            cadence,
            offload: Arc::new(OffloadManager::new()),
            fetcher,
            view_tx,
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Install subscriptions (which lazily opens the connection), spawn the
    /// refresh task and cadence driver, and kick an initial snapshot fetch.
    pub fn start(&self) -> anyhow::Result<()> {
        let signal_rx = self
            .signal_rx
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("MonitorSync already started"))?;

        {
            let mut subscriptions = self.subscriptions.lock();
            for kind in [
                event_type::PROGRESS_UPDATE,
                event_type::CELL_EXECUTION,
                event_type::HELP_REQUEST,
                event_type::HELP_RESOLVED,
            ] {
                let reconciler = self.reconciler.clone();
                let signal_tx = self.signal_tx.clone();
                let id = self.multiplexer.subscribe(
                    kind,
                    Arc::new(move |message: &EventMessage| {
                        match reconciler.handle_event(message) {
                            ReconcileOutcome::Applied => {
                                let _ = signal_tx.send(SyncSignal::ReRank);
                            }
                            ReconcileOutcome::AppliedNeedsUrgencyRefresh => {
                                let _ = signal_tx.send(SyncSignal::ReRank);
                                let _ = signal_tx
                                    .send(SyncSignal::Refresh(RefreshReason::UrgencyBackstop));
                            }
                            ReconcileOutcome::Ignored => {}
                        }
                        Ok(())
                    }),
                );
                subscriptions.push(id);
            }
        }

        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_refresh_task(signal_rx));

        let signal_tx = self.signal_tx.clone();
        tasks.push(self.cadence.clone().spawn_driver(move || {
            let _ = signal_tx.send(SyncSignal::Refresh(RefreshReason::Scheduled));
        }));

        let _ = self
            .signal_tx
            .send(SyncSignal::Refresh(RefreshReason::Initial));
        Ok(())
    }

    /// Drop subscriptions (closing the shared connection), stop background
    /// tasks. A stopped instance stays readable but no longer updates.
    pub fn shutdown(&self) {
        for id in self.subscriptions.lock().drain(..) {
            self.multiplexer.unsubscribe(&id);
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.multiplexer.disconnect();
    }

    fn spawn_refresh_task(
        &self,
        mut signal_rx: mpsc::UnboundedReceiver<SyncSignal>,
    ) -> tokio::task::JoinHandle<()> {
        let reconciler = self.reconciler.clone();
        let cadence = self.cadence.clone();
        let fetcher = self.fetcher.clone();
        let view_tx = self.view_tx.clone();
        let display_limit = self.config.display_limit;
        let backstop_delay = self.config.urgency_backstop_delay;

        tokio::spawn(async move {
            while let Some(signal) = signal_rx.recv().await {
                match signal {
                    SyncSignal::ReRank => {
                        publish_view(&reconciler, &cadence, &view_tx, display_limit);
                    }
                    SyncSignal::Refresh(reason) => {
                        if reason == RefreshReason::UrgencyBackstop {
                            // Help events arrive in bursts; waiting here and
                            // draining the queue coalesces them into one fetch.
                            tokio::time::sleep(backstop_delay).await;
                            while signal_rx.try_recv().is_ok() {}
                        }
                        match fetcher.fetch().await {
                            Ok(snapshot) => {
                                reconciler.apply_full_snapshot(snapshot);
                                publish_view(&reconciler, &cadence, &view_tx, display_limit);
                            }
                            Err(err) => {
                                tracing::warn!(?reason, error = %err, "snapshot fetch failed");
                            }
                        }
                    }
                }
            }
        })
    }

    /// Watch handle for the presentation layer; updates on every ranking pass.
    pub fn view(&self) -> watch::Receiver<RankedView> {
        self.view_tx.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.multiplexer.connection_state()
    }

    pub fn cadence_stats(&self) -> CadenceStats {
        self.cadence.stats()
    }

    /// User-interaction signal (pointer/key/scroll/touch).
    pub fn record_activity(&self) {
        self.cadence.record_activity();
    }

    pub fn set_expanded_views(&self, count: usize) {
        self.cadence.set_expanded_views(count);
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        self.cadence.set_auto_refresh(enabled);
    }

    /// Immediate, uncounted refresh on top of the scheduled ones.
    pub fn manual_refresh(&self) {
        self.cadence.note_manual_refresh();
        let _ = self
            .signal_tx
            .send(SyncSignal::Refresh(RefreshReason::Manual));
    }

    pub fn multiplexer(&self) -> &ConnectionMultiplexer {
        &self.multiplexer
    }

    pub fn offload(&self) -> &OffloadManager {
        &self.offload
    }

    // Outbound user actions. All fire-and-forget: false means "not delivered".

    pub fn send_instructor_status(&self, status: &str) -> bool {
        self.multiplexer
            .send_envelope(&outbound::instructor_status_update(status))
    }

    pub fn send_instructor_location(&self, location: &str) -> bool {
        self.multiplexer
            .send_envelope(&outbound::instructor_location_update(location))
    }

    pub fn subscribe_notifications(&self, topics: &[&str]) -> bool {
        self.multiplexer
            .send_envelope(&outbound::notification_subscription(topics))
    }

    pub fn respond_to_help(&self, student_id: &str, accepted: bool) -> bool {
        self.multiplexer
            .send_envelope(&outbound::help_response(student_id, accepted))
    }
}

fn publish_view(
    reconciler: &RosterReconciler,
    cadence: &CadenceController,
    view_tx: &watch::Sender<RankedView>,
    display_limit: usize,
) {
    let students = reconciler.students();
    let urgent = students.iter().filter(|s| s.is_urgent).count();
    cadence.set_urgent_count(urgent);
    let view = rank_teams(&students, Utc::now(), display_limit);
    view_tx.send_replace(view);
}
