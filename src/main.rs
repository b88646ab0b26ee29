mod cli;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use clap::Parser;
use cli::{Cli, SinkKind, SourceKind};
use depthgrid::engine::LumaProxyEngine;
use depthgrid::sink::{LogSink, ResultSink};
use depthgrid::source::{self, TestPattern};
use depthgrid::{Coordinator, Error, Pipeline, PipelineConfig};
use tracing::{error, info, warn};

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,depthgrid=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::try_from(&cli)?;

    info!(source = ?cli.source, sink = ?cli.sink, "Starting depth pipeline");

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
            warn!("Failed to install Ctrl+C handler: {e}");
        }
    }

    let engine = LumaProxyEngine::new(&config);
    let pipeline = Pipeline::start(config, engine)?;
    let capture = spawn_source(&cli, pipeline.coordinator(), stop.clone())?;

    match cli.sink {
        SinkKind::Log => run_sink(&pipeline, LogSink::new(cli.clear_threshold), &stop),
        #[cfg(feature = "ipc")]
        SinkKind::Ipc => run_sink(&pipeline, depthgrid::ipc::HeatmapPublisher::new()?, &stop),
    }

    // The completion loop can also end because the worker died; make sure
    // the capture thread follows.
    stop.store(true, Ordering::SeqCst);
    let captured = capture
        .join()
        .map_err(|_| Error::ThreadPanicked("capture"))?;
    if let Err(e) = &captured {
        error!("Capture failed: {e}");
    }

    let snapshot = pipeline.shutdown()?;
    info!(
        completed = snapshot.completed,
        failed = snapshot.failed,
        fps = snapshot.fps,
        inference_ms = snapshot.avg_inference_latency.as_millis() as u64,
        execution_ms = snapshot.avg_execution_latency.as_millis() as u64,
        "Stopped"
    );
    captured
}

fn run_sink<S: ResultSink>(pipeline: &Pipeline, sink: S, stop: &AtomicBool) {
    let _ = pipeline.run(sink, stop);
}

fn spawn_source(
    cli: &Cli,
    coordinator: Arc<Coordinator>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<Result<(), Error>>, Error> {
    let handle = match cli.source {
        SourceKind::TestPattern => source::spawn(
            TestPattern::new(cli.capture_width, cli.capture_height, cli.fps),
            coordinator,
            stop,
        )?,
        #[cfg(feature = "ipc")]
        SourceKind::Ipc => source::spawn(depthgrid::ipc::FrameSubscriber::default(), coordinator, stop)?,
        #[cfg(feature = "libcamera")]
        SourceKind::Camera => source::spawn(
            depthgrid::camera::LibcameraSource::new(cli.capture_width, cli.capture_height),
            coordinator,
            stop,
        )?,
    };
    Ok(handle)
}
