//! Single-flight scheduling between frame capture and inference.
//!
//! Three contexts cooperate:
//!
//! - capture threads call [`Coordinator::on_frame_captured`], which either
//!   hands the frame to the inference worker or drops it on the spot;
//! - the inference worker (see [`crate::engine::spawn_worker`]) runs the model
//!   and sends a [`Completion`] back over a channel;
//! - whoever owns the sink drives [`Pipeline::run`], feeding completions to
//!   [`CompletionHandler::on_inference_complete`].
//!
//! [`InFlight`] is the only shared mutable state.

mod coordinator;
mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};

pub use coordinator::{Admission, Completion, CompletionHandler, Coordinator, Job};
pub use state::{InFlight, Ticket};

use crate::config::PipelineConfig;
use crate::engine::{self, InferenceEngine};
use crate::error::Error;
use crate::perf::{PerformanceSnapshot, PerformanceTracker};
use crate::postprocess::HeatmapPostProcessor;
use crate::sink::ResultSink;

/// How often the completion loop wakes to check for shutdown.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Pipeline {
    config: PipelineConfig,
    state: Arc<InFlight>,
    coordinator: Arc<Coordinator>,
    completions: Receiver<Completion>,
    tracker: Arc<PerformanceTracker>,
    worker: JoinHandle<()>,
}

impl Pipeline {
    /// Validate `config` and start the inference worker.
    pub fn start<E: InferenceEngine>(config: PipelineConfig, engine: E) -> Result<Self, Error> {
        config.validate()?;

        let (completions_tx, completions) = mpsc::channel();
        let (jobs, worker) = engine::spawn_worker(engine, completions_tx)?;
        let state = Arc::new(InFlight::new());
        let coordinator = Arc::new(Coordinator::new(
            state.clone(),
            jobs,
            config.inference_timeout,
        ));
        let tracker = Arc::new(PerformanceTracker::new(config.perf_window));

        info!(
            height = config.height,
            width = config.width,
            grid_rows = config.grid_rows,
            grid_cols = config.grid_cols,
            "Pipeline started"
        );

        Ok(Self {
            config,
            state,
            coordinator,
            completions,
            tracker,
            worker,
        })
    }

    /// Handle for capture threads.
    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.clone()
    }

    pub fn tracker(&self) -> Arc<PerformanceTracker> {
        self.tracker.clone()
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        self.tracker.snapshot()
    }

    pub fn handler<S: ResultSink>(&self, sink: S) -> CompletionHandler<S> {
        CompletionHandler::new(
            self.state.clone(),
            HeatmapPostProcessor::new(&self.config),
            sink,
            self.tracker.clone(),
        )
    }

    /// Deliver completions to `sink` on the calling thread until `stop` is
    /// set or the worker has gone away. Returns the sink.
    pub fn run<S: ResultSink>(&self, sink: S, stop: &AtomicBool) -> S {
        let mut handler = self.handler(sink);
        while !stop.load(Ordering::Relaxed) {
            match self.completions.recv_timeout(STOP_POLL_INTERVAL) {
                Ok(completion) => handler.on_inference_complete(completion),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        handler.into_sink()
    }

    /// Stop the worker and wait for it.
    ///
    /// Capture threads must have released their coordinator handles first,
    /// otherwise the worker never sees its job channel close.
    pub fn shutdown(self) -> Result<PerformanceSnapshot, Error> {
        let snapshot = self.tracker.snapshot();
        drop(self.coordinator);
        drop(self.completions);
        self.worker
            .join()
            .map_err(|_| Error::ThreadPanicked("inference"))?;
        debug!("Pipeline stopped");
        Ok(snapshot)
    }
}
