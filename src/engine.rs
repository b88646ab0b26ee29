//! The inference seam and the worker thread that drives it.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, trace};

use crate::config::PipelineConfig;
use crate::frame::{Frame, PixelFormat};
use crate::pipeline::{Completion, Job};
use crate::postprocess::DenseOutput;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),
    #[error("model error: {0}")]
    Model(String),
}

/// A depth model. Called from a single worker thread, one frame at a time.
pub trait InferenceEngine: Send + 'static {
    fn infer(&mut self, frame: &Frame) -> Result<DenseOutput, InferenceError>;
}

impl<F> InferenceEngine for F
where
    F: FnMut(&Frame) -> Result<DenseOutput, InferenceError> + Send + 'static,
{
    fn infer(&mut self, frame: &Frame) -> Result<DenseOutput, InferenceError> {
        self(frame)
    }
}

/// Move `engine` onto its own thread.
///
/// Jobs arrive on the returned sender; each produces exactly one completion.
/// The thread exits once the job sender is dropped.
pub fn spawn_worker<E: InferenceEngine>(
    mut engine: E,
    completions: Sender<Completion>,
) -> io::Result<(SyncSender<Job>, JoinHandle<()>)> {
    let (jobs_tx, jobs_rx): (SyncSender<Job>, Receiver<Job>) = mpsc::sync_channel(1);

    let handle = thread::Builder::new()
        .name("inference".into())
        .spawn(move || {
            for job in jobs_rx {
                let started_at = Instant::now();
                let output = engine.infer(&job.frame);
                let finished_at = Instant::now();
                trace!(sequence = job.frame.sequence, "Inference finished");

                let completion = Completion {
                    ticket: job.ticket,
                    sequence: job.frame.sequence,
                    captured_at: job.frame.captured_at,
                    started_at,
                    finished_at,
                    output,
                };
                if completions.send(completion).is_err() {
                    break;
                }
            }
            debug!("Inference worker exiting");
        })?;

    Ok((jobs_tx, handle))
}

/// Stand-in engine for running the pipeline without a model.
///
/// Resamples the luma plane to the output shape with nearest-neighbour
/// sampling and reports darker pixels as nearer (`1 - y / 255`).
#[derive(Debug, Clone)]
pub struct LumaProxyEngine {
    height: usize,
    width: usize,
}

impl LumaProxyEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            height: config.height,
            width: config.width,
        }
    }
}

impl InferenceEngine for LumaProxyEngine {
    fn infer(&mut self, frame: &Frame) -> Result<DenseOutput, InferenceError> {
        if !frame.format.has_luma_plane() {
            return Err(InferenceError::UnsupportedFormat(frame.format));
        }
        if frame.width == 0 || frame.height == 0 || frame.stride < frame.width {
            return Err(InferenceError::MalformedFrame(format!(
                "{}x{} with stride {}",
                frame.width, frame.height, frame.stride
            )));
        }
        let luma = frame.luma_plane().ok_or_else(|| {
            InferenceError::MalformedFrame(format!(
                "{} bytes is short of a {}x{} luma plane",
                frame.pixels().len(),
                frame.stride,
                frame.height
            ))
        })?;

        let (src_w, src_h, stride) = (
            frame.width as usize,
            frame.height as usize,
            frame.stride as usize,
        );
        let mut out = Vec::with_capacity(self.height * self.width);
        for y in 0..self.height {
            let sy = y * src_h / self.height;
            let line = &luma[sy * stride..sy * stride + src_w];
            for x in 0..self.width {
                let sx = x * src_w / self.width;
                out.push(1.0 - f32::from(line[sx]) / 255.0);
            }
        }
        Ok(out)
    }
}
