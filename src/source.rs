//! Frame producers feeding the coordinator.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::Error;
use crate::frame::{Frame, PixelFormat};
use crate::pipeline::{Admission, Coordinator};

/// Pushes frames into the coordinator until `stop` is set or the source runs
/// dry. Drops are silent: admission results are not fed back.
pub trait FrameSource: Send + 'static {
    fn name(&self) -> &'static str;

    fn run(self, coordinator: &Coordinator, stop: &AtomicBool) -> Result<(), Error>;
}

/// Run `source` on its own capture thread.
///
/// When the source finishes, for any reason, `stop` is raised so the rest of
/// the pipeline winds down with it.
pub fn spawn<S: FrameSource>(
    source: S,
    coordinator: Arc<Coordinator>,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<Result<(), Error>>> {
    thread::Builder::new()
        .name(format!("capture-{}", source.name()))
        .spawn(move || {
            let result = source.run(&coordinator, &stop);
            stop.store(true, Ordering::SeqCst);
            result
        })
}

/// Frames between two "Progress" log lines.
pub const PROGRESS_EVERY: u64 = 100;

/// Counts every frame a source receives, including the ones it skips while
/// the coordinator is busy, and logs every `every`-th.
#[derive(Debug)]
pub struct FrameCounter {
    source: &'static str,
    every: u64,
    seen: u64,
}

impl FrameCounter {
    pub fn new(source: &'static str, every: u64) -> Self {
        Self {
            source,
            every: every.max(1),
            seen: 0,
        }
    }

    /// Count one frame. Returns `true` if this frame logged progress.
    pub fn tick(&mut self) -> bool {
        self.seen += 1;
        let due = self.seen % self.every == 0;
        if due {
            info!(source = self.source, seen = self.seen, "Progress");
        }
        due
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }
}

/// Synthetic YUV420 frames with a drifting luma gradient.
#[derive(Debug, Clone)]
pub struct TestPattern {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Stop after this many frames. `None` runs until stopped.
    pub limit: Option<u64>,
}

impl TestPattern {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            limit: None,
        }
    }

    /// Render frame `sequence`.
    pub fn frame(&self, sequence: u64) -> Frame {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = vec![128u8; w * h * 3 / 2];
        let shift = sequence as usize;
        for y in 0..h {
            for x in 0..w {
                data[y * w + x] = ((x + y + shift) % 256) as u8;
            }
        }
        Frame::new(
            sequence,
            self.width,
            self.height,
            self.width,
            PixelFormat::Yuv420,
            data,
        )
    }
}

impl FrameSource for TestPattern {
    fn name(&self) -> &'static str {
        "test-pattern"
    }

    fn run(self, coordinator: &Coordinator, stop: &AtomicBool) -> Result<(), Error> {
        let interval = Duration::from_secs(1) / self.fps.max(1);
        info!(
            width = self.width,
            height = self.height,
            fps = self.fps,
            "Test pattern starting"
        );

        let mut counter = FrameCounter::new(self.name(), PROGRESS_EVERY);
        let mut seq: u64 = 0;
        let mut next = Instant::now();
        while !stop.load(Ordering::Relaxed) && self.limit.is_none_or(|limit| seq < limit) {
            counter.tick();
            if coordinator.is_idle() {
                if let Admission::Admitted(_) = coordinator.on_frame_captured(self.frame(seq)) {
                    debug!(seq, "Admitted");
                }
            }
            seq += 1;

            next += interval;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                next = now;
            }
        }

        info!(frames = counter.seen(), "Test pattern finished");
        Ok(())
    }
}
