use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

fn env_truthy(var: &str) -> Option<bool> {
    std::env::var(var).map(|v| v != "0" && !v.is_empty()).ok()
}

static PERF_ENABLED: Lazy<bool> =
    Lazy::new(|| env_truthy("LECTERN_PERF").unwrap_or(false));

static STATS: Lazy<Mutex<HashMap<&'static str, PerfStat>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

static GAUGES: Lazy<Mutex<HashMap<&'static str, u64>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Default, Clone, Copy)]
pub struct PerfStat {
    pub total_ns: u128,
    pub max_ns: u128,
    pub count: u64,
}

impl PerfStat {
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((self.total_ns / self.count as u128) as u64)
        }
    }
}

pub fn enabled() -> bool {
    *PERF_ENABLED
}

pub fn record_duration(label: &'static str, duration: Duration) {
    if !enabled() {
        return;
    }
    let mut stats = STATS.lock();
    let entry = stats.entry(label).or_default();
    entry.count += 1;
    let nanos = duration.as_nanos();
    entry.total_ns += nanos;
    if nanos > entry.max_ns {
        entry.max_ns = nanos;
    }
    if entry.count % 200 == 0 {
        tracing::debug!(
            label,
            count = entry.count,
            avg_us = (entry.average().as_micros() as u64),
            max_us = (entry.max_ns / 1_000) as u64,
            "perf stat"
        );
    }
}

pub fn record_gauge(label: &'static str, value: u64) {
    if !enabled() {
        return;
    }
    GAUGES.lock().insert(label, value);
}

pub fn stat(label: &'static str) -> Option<PerfStat> {
    STATS.lock().get(label).copied()
}

pub fn gauge(label: &'static str) -> Option<u64> {
    GAUGES.lock().get(label).copied()
}
