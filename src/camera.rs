//! In-process capture from the first libcamera device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use libcamera::{
    camera::CameraConfigurationStatus,
    camera_manager::CameraManager,
    framebuffer::AsFrameBuffer,
    framebuffer_allocator::{FrameBuffer, FrameBufferAllocator},
    framebuffer_map::MemoryMappedFrameBuffer,
    geometry::Size,
    request::ReuseFlag,
    stream::StreamRole,
};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::frame::{Frame, PixelFormat};
use crate::pipeline::{Admission, Coordinator};
use crate::source::{FrameCounter, FrameSource, PROGRESS_EVERY};

/// How long to wait for a completed request before re-checking `stop`.
const REQUEST_WAIT: Duration = Duration::from_millis(200);

fn camera_err(e: impl std::fmt::Debug) -> Error {
    Error::Camera(format!("{e:?}"))
}

#[derive(Debug, Clone)]
pub struct LibcameraSource {
    pub width: u32,
    pub height: u32,
}

impl LibcameraSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl FrameSource for LibcameraSource {
    fn name(&self) -> &'static str {
        "libcamera"
    }

    fn run(self, coordinator: &Coordinator, stop: &AtomicBool) -> Result<(), Error> {
        let mgr = CameraManager::new().map_err(camera_err)?;
        let cameras = mgr.cameras();
        let cam = cameras.get(0).ok_or(Error::NoCamera)?;

        info!(id = %cam.id(), "Found camera");

        let mut cam = cam.acquire().map_err(camera_err)?;
        let mut config = cam
            .generate_configuration(&[StreamRole::VideoRecording])
            .ok_or_else(|| Error::Camera("Failed to generate config".into()))?;

        config
            .get_mut(0)
            .ok_or_else(|| Error::Camera("No stream configuration".into()))?
            .set_size(Size::new(self.width, self.height));

        match config.validate() {
            CameraConfigurationStatus::Valid => info!("Config valid"),
            CameraConfigurationStatus::Adjusted => warn!("Config adjusted"),
            CameraConfigurationStatus::Invalid => {
                return Err(Error::Camera("Invalid config".into()));
            }
        }

        cam.configure(&mut config).map_err(camera_err)?;

        let stream_config = config
            .get(0)
            .ok_or_else(|| Error::Camera("No stream configuration".into()))?;
        let stream = stream_config
            .stream()
            .ok_or_else(|| Error::Camera("No stream in configuration".into()))?;
        let width = stream_config.get_size().width;
        let height = stream_config.get_size().height;
        let stride = stream_config.get_stride() as u32;
        let format = PixelFormat::from_fourcc(stream_config.get_pixel_format().fourcc());

        info!(width, height, stride, ?format, "Camera configured");

        let mut alloc = FrameBufferAllocator::new(&cam);
        let buffers = alloc
            .alloc(&stream)
            .map_err(camera_err)?
            .into_iter()
            .map(|b| MemoryMappedFrameBuffer::new(b).map_err(camera_err))
            .collect::<Result<Vec<_>, Error>>()?;

        let requests = buffers
            .into_iter()
            .map(|buf| {
                let mut req = cam
                    .create_request(None)
                    .ok_or_else(|| Error::Camera("Failed to create request".into()))?;
                req.add_buffer(&stream, buf).map_err(camera_err)?;
                Ok(req)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        // Completed requests come back on libcamera's thread; hand them over.
        let (tx, rx) = mpsc::channel();
        cam.on_request_completed(move |req| {
            let _ = tx.send(req);
        });

        cam.start(None).map_err(camera_err)?;
        for req in requests {
            cam.queue_request(req).map_err(|(_, e)| camera_err(e))?;
        }

        info!("Capture loop starting");

        let mut counter = FrameCounter::new(self.name(), PROGRESS_EVERY);
        let mut seq: u64 = 0;
        while !stop.load(Ordering::Relaxed) {
            let mut req = match rx.recv_timeout(REQUEST_WAIT) {
                Ok(req) => req,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            counter.tick();

            if coordinator.is_idle() {
                match capture(&req, &stream, seq, width, height, stride, format) {
                    Some(frame) => {
                        if let Admission::Admitted(_) = coordinator.on_frame_captured(frame) {
                            debug!(seq, "Admitted");
                        }
                    }
                    None => warn!(seq, "Request carried no usable buffer"),
                }
            }

            seq += 1;

            req.reuse(ReuseFlag::REUSE_BUFFERS);
            cam.queue_request(req).map_err(|(_, e)| camera_err(e))?;
        }

        cam.stop().map_err(camera_err)?;
        Ok(())
    }
}

/// Copy the first plane of a completed request into an owned frame.
fn capture(
    req: &libcamera::request::Request,
    stream: &libcamera::stream::Stream,
    seq: u64,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
) -> Option<Frame> {
    let fb: &MemoryMappedFrameBuffer<FrameBuffer> = req.buffer(stream)?;
    let metadata = fb.metadata()?;
    let planes = fb.data();
    let plane = planes.first()?;
    let bytes_used = metadata
        .planes()
        .get(0)
        .map(|p| p.bytes_used as usize)
        .unwrap_or(plane.len())
        .min(plane.len());

    Some(Frame::captured(
        seq,
        width,
        height,
        stride,
        format,
        plane[..bytes_used].to_vec(),
        Instant::now(),
    ))
}
