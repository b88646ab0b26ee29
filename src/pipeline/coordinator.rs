use std::sync::Arc;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::time::{Duration, Instant};

use tracing::{error, info, trace, warn};

use crate::engine::InferenceError;
use crate::frame::Frame;
use crate::perf::{PerformanceSample, PerformanceTracker};
use crate::pipeline::state::{InFlight, Ticket};
use crate::postprocess::{DenseOutput, HeatmapPostProcessor};
use crate::sink::ResultSink;

/// Frame handed to the inference worker.
#[derive(Debug)]
pub struct Job {
    pub ticket: Ticket,
    pub frame: Frame,
}

/// Outcome of one inference, sent back by the worker.
#[derive(Debug)]
pub struct Completion {
    pub ticket: Ticket,
    pub sequence: u64,
    pub captured_at: Instant,
    pub started_at: Instant,
    pub finished_at: Instant,
    pub output: Result<DenseOutput, InferenceError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(Ticket),
    /// Busy, or the worker could not take the frame. The frame is gone.
    Dropped,
}

/// Capture-side half: admits at most one frame at a time.
///
/// Safe to share between threads; `on_frame_captured` never blocks.
pub struct Coordinator {
    state: Arc<InFlight>,
    jobs: SyncSender<Job>,
    timeout: Option<Duration>,
}

impl Coordinator {
    pub fn new(state: Arc<InFlight>, jobs: SyncSender<Job>, timeout: Option<Duration>) -> Self {
        Self {
            state,
            jobs,
            timeout,
        }
    }

    /// Advisory: lets sources skip copying pixels that would be dropped.
    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    pub fn on_frame_captured(&self, frame: Frame) -> Admission {
        if let Some(timeout) = self.timeout {
            if let Some(stale) = self.state.expire(timeout) {
                warn!(
                    ?stale,
                    timeout_ms = timeout.as_millis() as u64,
                    "Inference timed out, releasing slot"
                );
            }
        }

        let Some(ticket) = self.state.try_admit() else {
            trace!(sequence = frame.sequence, "Busy, dropping frame");
            return Admission::Dropped;
        };

        match self.jobs.try_send(Job { ticket, frame }) {
            Ok(()) => Admission::Admitted(ticket),
            Err(TrySendError::Full(job)) => {
                // A timed-out frame is still running and its replacement is
                // already queued behind it.
                warn!(sequence = job.frame.sequence, "Inference worker still busy, dropping frame");
                self.state.clear(ticket);
                Admission::Dropped
            }
            Err(TrySendError::Disconnected(job)) => {
                error!(sequence = job.frame.sequence, "Inference worker gone, dropping frame");
                self.state.clear(ticket);
                Admission::Dropped
            }
        }
    }
}

/// Completion-side half: runs on the context that owns the sink.
pub struct CompletionHandler<S> {
    state: Arc<InFlight>,
    processor: HeatmapPostProcessor,
    sink: S,
    tracker: Arc<PerformanceTracker>,
}

impl<S: ResultSink> CompletionHandler<S> {
    pub fn new(
        state: Arc<InFlight>,
        processor: HeatmapPostProcessor,
        sink: S,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        Self {
            state,
            processor,
            sink,
            tracker,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn on_inference_complete(&mut self, completion: Completion) {
        if !self.state.clear(completion.ticket) {
            // The slot was force-cleared by a timeout and may now belong to
            // another frame; this result is too late to publish.
            warn!(sequence = completion.sequence, "Discarding late inference result");
            return;
        }

        let mut sample = PerformanceSample {
            captured_at: completion.captured_at,
            inference_start: completion.started_at,
            inference_end: completion.finished_at,
            frame_accepted: false,
        };

        let dense = match completion.output {
            Ok(dense) => dense,
            Err(e) => {
                warn!(sequence = completion.sequence, "Inference failed: {e}");
                self.tracker.record(sample);
                return;
            }
        };

        match self
            .processor
            .process(completion.sequence, completion.captured_at, dense)
        {
            Ok(result) => {
                self.sink.publish(result);
                sample.frame_accepted = true;
                self.tracker.record_published(sample, Instant::now());
            }
            Err(e) => {
                error!(sequence = completion.sequence, "Inference output rejected: {e}");
                self.tracker.record(sample);
                return;
            }
        }

        let snapshot = self.tracker.snapshot();
        if snapshot.completed % 100 == 0 {
            info!(
                completed = snapshot.completed,
                failed = snapshot.failed,
                fps = snapshot.fps,
                latency_ms = snapshot.avg_inference_latency.as_millis() as u64,
                "Progress"
            );
        }
    }
}
