//! Rolling inference latency and frame rate.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Samples older than this relative to the newest one leave the window.
pub const WINDOW_HORIZON: Duration = Duration::from_secs(2);

/// Timing of one admitted frame.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceSample {
    pub captured_at: Instant,
    pub inference_start: Instant,
    pub inference_end: Instant,
    /// `false` when inference or post-processing failed.
    pub frame_accepted: bool,
}

impl PerformanceSample {
    pub fn inference_latency(&self) -> Duration {
        self.inference_end.saturating_duration_since(self.inference_start)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceSnapshot {
    pub avg_inference_latency: Duration,
    /// Capture to publish.
    pub avg_execution_latency: Duration,
    pub fps: f64,
    pub completed: u64,
    pub failed: u64,
}

struct WindowEntry {
    inference_end: Instant,
    inference_latency: Duration,
    execution_latency: Option<Duration>,
    accepted: bool,
}

/// Turns samples into a snapshot readable from any thread.
///
/// `record` serialises on an internal mutex. The derived figures are then
/// stored in atomics, so `snapshot` only ever loads them and never waits on a
/// concurrent `record`.
pub struct PerformanceTracker {
    capacity: usize,
    horizon: Duration,
    window: Mutex<VecDeque<WindowEntry>>,
    inference_nanos: AtomicU64,
    execution_nanos: AtomicU64,
    fps_bits: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl PerformanceTracker {
    pub fn new(capacity: usize) -> Self {
        Self::with_horizon(capacity, WINDOW_HORIZON)
    }

    pub fn with_horizon(capacity: usize, horizon: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            horizon,
            window: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            inference_nanos: AtomicU64::new(0),
            execution_nanos: AtomicU64::new(0),
            fps_bits: AtomicU64::new(0f64.to_bits()),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Record the sample, reporting when the result reached the sink.
    pub fn record_published(&self, sample: PerformanceSample, published_at: Instant) {
        self.push(sample, Some(published_at.saturating_duration_since(sample.captured_at)));
    }

    pub fn record(&self, sample: PerformanceSample) {
        self.push(sample, None);
    }

    fn push(&self, sample: PerformanceSample, execution_latency: Option<Duration>) {
        if sample.frame_accepted {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.push_back(WindowEntry {
            inference_end: sample.inference_end,
            inference_latency: sample.inference_latency(),
            execution_latency,
            accepted: sample.frame_accepted,
        });
        while window.len() > self.capacity {
            window.pop_front();
        }
        let newest = sample.inference_end;
        while window
            .front()
            .is_some_and(|entry| newest.saturating_duration_since(entry.inference_end) > self.horizon)
        {
            window.pop_front();
        }

        let inference = average(window.iter().map(|e| e.inference_latency));
        let execution = average(window.iter().filter_map(|e| e.execution_latency));
        let fps = frame_rate(window.iter().filter(|e| e.accepted).map(|e| e.inference_end));
        drop(window);

        self.inference_nanos.store(as_nanos(inference), Ordering::Relaxed);
        self.execution_nanos.store(as_nanos(execution), Ordering::Relaxed);
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            avg_inference_latency: Duration::from_nanos(self.inference_nanos.load(Ordering::Relaxed)),
            avg_execution_latency: Duration::from_nanos(self.execution_nanos.load(Ordering::Relaxed)),
            fps: f64::from_bits(self.fps_bits.load(Ordering::Relaxed)),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

fn average(latencies: impl Iterator<Item = Duration>) -> Duration {
    let (total, count) = latencies.fold((Duration::ZERO, 0u32), |(total, count), d| {
        (total + d, count + 1)
    });
    if count == 0 { Duration::ZERO } else { total / count }
}

fn frame_rate(mut ends: impl Iterator<Item = Instant>) -> f64 {
    let Some(first) = ends.next() else {
        return 0.0;
    };
    let (last, intervals) = ends.fold((first, 0u32), |(_, n), end| (end, n + 1));
    let span = last.saturating_duration_since(first).as_secs_f64();
    if intervals == 0 || span <= 0.0 {
        0.0
    } else {
        f64::from(intervals) / span
    }
}

fn as_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
