use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::config::CadenceConfig;

/// Why a refresh was requested. Scheduled ticks count toward the refresh
/// total; the others are uncounted extras.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Scheduled,
    Manual,
    UrgencyBackstop,
    Initial,
}

/// Polling baseline used for the savings estimate: what a naive dashboard
/// polling every 5 seconds would have cost over the same session.
const BASELINE_POLL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct CadenceStats {
    pub current_interval: Duration,
    pub is_user_active: bool,
    pub is_urgent: bool,
    pub refresh_count: u64,
    pub saved_calls_estimate: u64,
    pub efficiency_percent: f64,
}

struct CadenceState {
    auto_refresh_enabled: bool,
    urgent_count: usize,
    expanded_views: usize,
    is_user_active: bool,
    last_active_at: Instant,
    refresh_count: u64,
    started_at: Instant,
}

/// Decides how often the bounded display refreshes, from user-activity
/// recency and the current urgency count. The driver task re-arms its timer
/// through a watch channel on every recalculation, so there is never more
/// than one timer in flight.
pub struct CadenceController {
    config: CadenceConfig,
    state: Mutex<CadenceState>,
    interval_tx: watch::Sender<Duration>,
}

impl CadenceController {
    pub fn new(config: CadenceConfig) -> Self {
        let now = Instant::now();
        let (interval_tx, _) = watch::channel(config.base_interval);
        Self {
            config,
            state: Mutex::new(CadenceState {
                auto_refresh_enabled: true,
                urgent_count: 0,
                expanded_views: 0,
                is_user_active: false,
                last_active_at: now,
                refresh_count: 0,
                started_at: now,
            }),
            interval_tx,
        }
    }

    pub fn current_interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// Any pointer/key/scroll/touch signal lands here.
    pub fn record_activity(&self) {
        {
            let mut state = self.state.lock();
            state.is_user_active = true;
            state.last_active_at = Instant::now();
        }
        self.recalculate();
    }

    pub fn set_urgent_count(&self, count: usize) {
        {
            let mut state = self.state.lock();
            if state.urgent_count == count {
                return;
            }
            state.urgent_count = count;
        }
        self.recalculate();
    }

    /// Expanded/focused views count as activity: focus implies imminent need
    /// for freshness.
    pub fn set_expanded_views(&self, count: usize) {
        {
            let mut state = self.state.lock();
            if state.expanded_views == count {
                return;
            }
            state.expanded_views = count;
        }
        self.recalculate();
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        self.state.lock().auto_refresh_enabled = enabled;
        self.recalculate();
    }

    /// Manual refresh resets the activity clock; the refresh itself is fired
    /// by the coordinator and is not counted against the schedule.
    pub fn note_manual_refresh(&self) {
        {
            let mut state = self.state.lock();
            state.is_user_active = true;
            state.last_active_at = Instant::now();
        }
        self.recalculate();
    }

    fn note_scheduled_refresh(&self) -> bool {
        let mut state = self.state.lock();
        if !state.auto_refresh_enabled {
            return false;
        }
        state.refresh_count += 1;
        true
    }

    fn recalculate(&self) {
        let interval = {
            let mut state = self.state.lock();
            let since_active = state.last_active_at.elapsed();
            if since_active > self.config.inactive_threshold {
                state.is_user_active = false;
            }
            let active = state.is_user_active || state.expanded_views > 0;
            interval_for(&self.config, state.urgent_count, active, since_active)
        };
        self.interval_tx.send_if_modified(|current| {
            if *current == interval {
                false
            } else {
                *current = interval;
                true
            }
        });
    }

    pub fn stats(&self) -> CadenceStats {
        let state = self.state.lock();
        let session = state.started_at.elapsed();
        let baseline_calls = (session.as_secs_f64() / BASELINE_POLL.as_secs_f64()) as u64;
        let saved = baseline_calls.saturating_sub(state.refresh_count);
        let efficiency = if baseline_calls > 0 {
            saved as f64 / baseline_calls as f64 * 100.0
        } else {
            0.0
        };
        CadenceStats {
            current_interval: *self.interval_tx.borrow(),
            is_user_active: state.is_user_active || state.expanded_views > 0,
            is_urgent: state.urgent_count > 0,
            refresh_count: state.refresh_count,
            saved_calls_estimate: saved,
            efficiency_percent: efficiency,
        }
    }

    /// Periodic driver. Re-arms whenever the interval changes; ticks invoke
    /// `on_tick` only while auto-refresh is enabled.
    pub fn spawn_driver(
        self: Arc<Self>,
        on_tick: impl Fn() + Send + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let controller = self;
        let mut interval_rx = controller.interval_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let interval = *interval_rx.borrow_and_update();
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if controller.note_scheduled_refresh() {
                            on_tick();
                        }
                        // Inactivity decay only shows up when something
                        // re-evaluates; the tick is that something.
                        controller.recalculate();
                    }
                    changed = interval_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        })
    }
}

/// Pure interval selection. Urgency always wins; long inactivity slows the
/// cadence down; activity speeds it up.
pub fn interval_for(
    config: &CadenceConfig,
    urgent_count: usize,
    user_active: bool,
    since_active: Duration,
) -> Duration {
    if urgent_count > 0 {
        config.urgent_interval
    } else if since_active > config.max_inactive_time {
        config.base_interval * 4
    } else if since_active > config.inactive_threshold {
        config.base_interval * 2
    } else if user_active {
        config.active_interval
    } else {
        config.base_interval
    }
}
