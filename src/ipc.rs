//! Zero-copy IPC via iceoryx2: camera frames in, heatmaps out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use iceoryx2::node::Node;
use iceoryx2::port::publisher::Publisher;
use iceoryx2::prelude::*;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::frame::{Frame, PixelFormat};
use crate::pipeline::{Admission, Coordinator};
use crate::postprocess::HeatmapResult;
use crate::sink::ResultSink;
use crate::source::{FrameCounter, FrameSource, PROGRESS_EVERY};

pub const FRAME_SERVICE: &str = "camera/frames";
pub const HEATMAP_SERVICE: &str = "depth/heatmap";

/// Max frame size: 1080p YUV420 = 1920 * 1080 * 1.5 ≈ 3.1MB
pub const MAX_FRAME_SIZE: usize = 1920 * 1080 * 3 / 2;
/// Room for the reference 128x160 output.
pub const MAX_HEATMAP_VALUES: usize = 128 * 160;
pub const MAX_GRID_CELLS: usize = 64;

/// Frame as laid out on the `camera/frames` service.
#[repr(C)]
#[derive(Debug, ZeroCopySend)]
#[type_name("Frame")]
pub struct CameraFrame {
    pub timestamp_ns: u64,
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub len: u32,
    pub data: [u8; MAX_FRAME_SIZE],
}

/// Result as laid out on the `depth/heatmap` service.
///
/// `heatmap` is column-major: value `(col, row)` sits at `col * height + row`.
#[repr(C)]
#[derive(Debug, ZeroCopySend)]
#[type_name("DepthResult")]
pub struct DepthResult {
    pub sequence: u64,
    pub height: u32,
    pub width: u32,
    pub grid_rows: u32,
    pub grid_cols: u32,
    pub heatmap: [f32; MAX_HEATMAP_VALUES],
    pub grid: [f32; MAX_GRID_CELLS],
}

fn ipc_err(e: impl std::fmt::Debug) -> Error {
    Error::Ipc(format!("{e:?}"))
}

/// Subscribes to camera frames published by another process.
#[derive(Debug, Clone)]
pub struct FrameSubscriber {
    /// Polling interval while no sample is pending.
    pub idle_sleep: Duration,
}

impl Default for FrameSubscriber {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_millis(1),
        }
    }
}

impl FrameSource for FrameSubscriber {
    fn name(&self) -> &'static str {
        "ipc"
    }

    fn run(self, coordinator: &Coordinator, stop: &AtomicBool) -> Result<(), Error> {
        // iceoryx2 ports are bound to the thread that creates them.
        let node = NodeBuilder::new()
            .create::<ipc::Service>()
            .map_err(ipc_err)?;
        let name: ServiceName = FRAME_SERVICE.try_into().map_err(ipc_err)?;
        let service = node
            .service_builder(&name)
            .publish_subscribe::<CameraFrame>()
            .open_or_create()
            .map_err(ipc_err)?;
        let subscriber = service.subscriber_builder().create().map_err(ipc_err)?;

        info!(service = FRAME_SERVICE, "Subscribed to camera frames");

        let mut counter = FrameCounter::new(self.name(), PROGRESS_EVERY);
        while !stop.load(Ordering::Relaxed) {
            let Some(sample) = subscriber.receive().map_err(ipc_err)? else {
                thread::sleep(self.idle_sleep);
                continue;
            };
            counter.tick();

            // Skip the pixel copy for frames that would be dropped anyway.
            if !coordinator.is_idle() {
                continue;
            }

            let payload = sample.payload();
            let len = payload.len as usize;
            if len > MAX_FRAME_SIZE {
                warn!(len, "Frame length exceeds buffer, skipping");
                continue;
            }
            let frame = Frame::captured(
                payload.sequence,
                payload.width,
                payload.height,
                payload.stride,
                payload.format,
                payload.data[..len].to_vec(),
                Instant::now(),
            );
            if let Admission::Admitted(_) = coordinator.on_frame_captured(frame) {
                debug!(seq = payload.sequence, "Admitted");
            }
        }
        Ok(())
    }
}

/// Publishes every result on the `depth/heatmap` service.
pub struct HeatmapPublisher {
    _node: Node<ipc::Service>,
    publisher: Publisher<ipc::Service, DepthResult, ()>,
}

impl HeatmapPublisher {
    pub fn new() -> Result<Self, Error> {
        let node = NodeBuilder::new()
            .create::<ipc::Service>()
            .map_err(ipc_err)?;
        let name: ServiceName = HEATMAP_SERVICE.try_into().map_err(ipc_err)?;
        let service = node
            .service_builder(&name)
            .publish_subscribe::<DepthResult>()
            .open_or_create()
            .map_err(ipc_err)?;
        let publisher = service.publisher_builder().create().map_err(ipc_err)?;

        info!(service = HEATMAP_SERVICE, "IPC publisher ready");
        Ok(Self {
            _node: node,
            publisher,
        })
    }
}

impl ResultSink for HeatmapPublisher {
    fn publish(&mut self, result: HeatmapResult) {
        let Some(payload) = encode(&result) else {
            warn!(
                height = result.heatmap.height(),
                width = result.heatmap.width(),
                cells = result.grid.cells().len(),
                "Result too large for IPC payload, skipping"
            );
            return;
        };
        match self.publisher.loan_uninit() {
            Ok(sample) => {
                let sample = sample.write_payload(payload);
                if let Err(e) = sample.send() {
                    warn!("Send failed: {e:?}");
                }
            }
            Err(e) => {
                warn!("Loan failed: {e:?}");
            }
        }
    }
}

fn encode(result: &HeatmapResult) -> Option<DepthResult> {
    let height = result.heatmap.height();
    let width = result.heatmap.width();
    let cells = result.grid.cells();
    if height * width > MAX_HEATMAP_VALUES || cells.len() > MAX_GRID_CELLS {
        return None;
    }

    let mut heatmap = [0.0f32; MAX_HEATMAP_VALUES];
    for (col, column) in result.heatmap.columns().enumerate() {
        heatmap[col * height..(col + 1) * height].copy_from_slice(column);
    }
    let mut grid = [0.0f32; MAX_GRID_CELLS];
    grid[..cells.len()].copy_from_slice(cells);

    Some(DepthResult {
        sequence: result.frame_sequence,
        height: height as u32,
        width: width as u32,
        grid_rows: result.grid.rows as u32,
        grid_cols: result.grid.cols as u32,
        heatmap,
        grid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::postprocess::HeatmapPostProcessor;

    #[test]
    fn encode_lays_heatmap_out_column_major() {
        let config = PipelineConfig {
            height: 2,
            width: 3,
            grid_rows: 1,
            grid_cols: 3,
            ..Default::default()
        };
        let result = HeatmapPostProcessor::new(&config)
            .process(9, Instant::now(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap();

        let encoded = encode(&result).unwrap();
        assert_eq!((encoded.height, encoded.width), (2, 3));
        assert_eq!(&encoded.heatmap[..6], &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert_eq!(&encoded.grid[..3], &[3.0, 5.0, 7.0]);
        assert_eq!(encoded.grid[3], 0.0);
    }
}
