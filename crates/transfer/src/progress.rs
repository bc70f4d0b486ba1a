use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Throughput samples retained per item for smoothing.
const SPEED_SAMPLE_WINDOW: usize = 5;

/// EMA weight given to the fresh window average.
const SPEED_SMOOTHING: f64 = 0.2;

const MIB: f64 = (1024 * 1024) as f64;

/// Aggregate progress, speed and ETA across all transferring items.
///
/// Owned by the coordinator; strategies never touch it directly — byte
/// counts arrive through the coordinator's progress channel keyed by item
/// id. All bookkeeping is callable without a runtime, which keeps the
/// math testable in isolation; only [`start`](Self::start) spawns the
/// periodic sampling task.
pub struct ProgressAggregator {
    inner: Arc<Mutex<AggregatorInner>>,
    stop: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

#[derive(Default)]
struct AggregatorInner {
    /// Total bytes per item id; lives for the whole batch.
    sizes: HashMap<u64, u64>,
    /// Bytes delivered so far per item id; monotonic until the item
    /// retires, at which point it is pinned to the item's size.
    progress: HashMap<u64, u64>,
    /// Speed-sampling state for items currently in the active set.
    sessions: HashMap<u64, SpeedSession>,
}

struct SpeedSession {
    current: u64,
    initial: u64,
    last_sample: Instant,
    recent: VecDeque<f64>,
    smoothed: f64,
    started: bool,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(AggregatorInner::default())),
            stop: Mutex::new(None),
        }
    }

    /// Registers an item's total size. Called at submission time.
    pub fn register(&self, id: u64, size: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.sizes.insert(id, size);
        inner.progress.insert(id, 0);
    }

    /// Creates the speed session for an item entering the active set.
    pub fn begin(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.insert(
            id,
            SpeedSession {
                current: 0,
                initial: 0,
                last_sample: Instant::now(),
                recent: VecDeque::with_capacity(SPEED_SAMPLE_WINDOW),
                smoothed: 0.0,
                started: false,
            },
        );
    }

    /// Records cumulative bytes delivered for an item.
    ///
    /// Clamped to the registered size and never allowed to decrease, so a
    /// strategy replaying an offset after resume cannot move the bar
    /// backwards.
    pub fn record(&self, id: u64, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        let Some(&size) = inner.sizes.get(&id) else {
            return;
        };
        let clamped = bytes.min(size);

        let entry = inner.progress.entry(id).or_insert(0);
        if clamped > *entry {
            *entry = clamped;
        }

        if let Some(session) = inner.sessions.get_mut(&id) {
            session.current = session.current.max(clamped);
            session.started = true;
        }
    }

    /// Retires an item: its progress is pinned to its full size (success
    /// or failure, the item is accounted for) and its speed session is
    /// dropped.
    pub fn finish(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&size) = inner.sizes.get(&id) {
            inner.progress.insert(id, size);
        }
        inner.sessions.remove(&id);
    }

    /// Takes one throughput sample for every started session.
    ///
    /// Per item: instantaneous speed is the byte delta since the previous
    /// sample divided by the elapsed time, in MiB/s; it enters a bounded
    /// ring of recent samples whose average is folded into an exponential
    /// moving average. The sample window then re-bases so the next tick
    /// measures only the fresh delta.
    pub fn sample_now(&self) {
        sample_inner(&self.inner, Instant::now());
    }

    /// Arithmetic mean of the active items' smoothed speeds, in MiB/s.
    ///
    /// Deliberately unweighted so many small slow items cannot mask one
    /// large fast one, and vice versa.
    pub fn speed_mbps(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        mean_speed(&inner)
    }

    /// Estimated time until the whole batch completes.
    ///
    /// `None` means unknown/infinite: no samples yet, or every transfer
    /// stalled. Never negative, never NaN.
    pub fn eta(&self) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        let speed_bps = mean_speed(&inner) * MIB;
        if speed_bps <= 0.0 {
            return None;
        }
        let remaining = remaining_bytes(&inner);
        Some(Duration::from_secs_f64(remaining as f64 / speed_bps))
    }

    /// Read-only snapshot of the whole batch.
    pub fn snapshot(&self) -> AggregateSnapshot {
        let inner = self.inner.lock().unwrap();

        let total_bytes: u64 = inner.sizes.values().sum();
        let sent_bytes: u64 = inner.progress.values().sum();

        let mut ids: Vec<u64> = inner.sizes.keys().copied().collect();
        ids.sort_unstable();
        let items = ids
            .into_iter()
            .map(|id| ItemProgress {
                id,
                percent: percent(
                    inner.progress.get(&id).copied().unwrap_or(0),
                    inner.sizes.get(&id).copied().unwrap_or(0),
                ),
            })
            .collect();

        let speed_mbps = mean_speed(&inner);
        let eta_secs = if speed_mbps > 0.0 {
            Some(remaining_bytes(&inner) as f64 / (speed_mbps * MIB))
        } else {
            None
        };

        AggregateSnapshot {
            total_bytes,
            sent_bytes,
            percent: percent(sent_bytes, total_bytes),
            transferred: format_bytes(sent_bytes),
            total: format_bytes(total_bytes),
            items,
            speed_mbps,
            eta_secs,
        }
    }

    /// Clears all batch state. Called at batch finalization and on abort.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.sizes.clear();
        inner.progress.clear();
        inner.sessions.clear();
    }

    /// Starts periodic sampling in a background tokio task.
    ///
    /// Call [`stop`](Self::stop) to cancel; starting again replaces any
    /// running task.
    pub fn start(&self, interval: Duration) {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        {
            let mut stop = self.stop.lock().unwrap();
            drop(stop.take());
            *stop = Some(tx);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately and would sample an empty
            // window; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sample_inner(&inner, Instant::now());
                    }
                    _ = &mut rx => {
                        break;
                    }
                }
            }
        });
    }

    /// Stops the periodic sampling task.
    pub fn stop(&self) {
        let mut stop = self.stop.lock().unwrap();
        // Dropping the sender signals the task to exit.
        drop(stop.take());
    }
}

fn sample_inner(inner: &Mutex<AggregatorInner>, now: Instant) {
    let mut inner = inner.lock().unwrap();
    for session in inner.sessions.values_mut().filter(|s| s.started) {
        let elapsed = now.saturating_duration_since(session.last_sample).as_secs_f64();
        if elapsed <= 0.0 {
            continue;
        }

        let delta = session.current.saturating_sub(session.initial);
        let instant_speed = delta as f64 / MIB / elapsed;

        session.recent.push_back(instant_speed);
        if session.recent.len() > SPEED_SAMPLE_WINDOW {
            session.recent.pop_front();
        }
        let avg = session.recent.iter().sum::<f64>() / session.recent.len() as f64;
        session.smoothed = SPEED_SMOOTHING * avg + (1.0 - SPEED_SMOOTHING) * session.smoothed;

        // Re-base so the next interval measures only its own delta.
        session.initial = session.current;
        session.last_sample = now;
    }
}

fn mean_speed(inner: &AggregatorInner) -> f64 {
    let speeds: Vec<f64> = inner
        .sessions
        .values()
        .filter(|s| s.started)
        .map(|s| s.smoothed)
        .collect();
    if speeds.is_empty() {
        return 0.0;
    }
    speeds.iter().sum::<f64>() / speeds.len() as f64
}

fn remaining_bytes(inner: &AggregatorInner) -> u64 {
    let total: u64 = inner.sizes.values().sum();
    let sent: u64 = inner.progress.values().sum();
    total.saturating_sub(sent)
}

fn percent(sent: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    sent.saturating_mul(100).div_ceil(total).min(100) as u32
}

/// Formats a byte count with binary units, e.g. `3.4 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;

    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Read-only aggregate view over a batch.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateSnapshot {
    pub total_bytes: u64,
    pub sent_bytes: u64,
    /// Overall completion, 0–100 (ceiling).
    pub percent: u32,
    /// Human-readable bytes transferred, e.g. `12.5 MiB`.
    pub transferred: String,
    /// Human-readable batch total.
    pub total: String,
    /// Per-item completion, ordered by id.
    pub items: Vec<ItemProgress>,
    /// Mean smoothed speed across active items, MiB/s.
    pub speed_mbps: f64,
    /// Seconds remaining; `None` when the speed is still zero.
    pub eta_secs: Option<f64>,
}

/// Completion of a single item within a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ItemProgress {
    pub id: u64,
    pub percent: u32,
}
