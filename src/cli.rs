use std::time::Duration;

use clap::{Parser, ValueEnum};
use depthgrid::config::{self, ConfigError, PipelineConfig};
use depthgrid::sink;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Synthetic gradient frames.
    TestPattern,
    /// Frames published on the `camera/frames` iceoryx2 service.
    #[cfg(feature = "ipc")]
    Ipc,
    /// Direct libcamera capture.
    #[cfg(feature = "libcamera")]
    Camera,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// Log grid sums and per-cell clear/blocked flags.
    Log,
    /// Publish on the `depth/heatmap` iceoryx2 service.
    #[cfg(feature = "ipc")]
    Ipc,
}

/// Turn a live camera feed into depth heatmaps and 3x3 grid sums.
#[derive(Debug, Parser)]
#[command(name = "depthgrid", version)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = SourceKind::TestPattern)]
    pub source: SourceKind,
    #[arg(long, value_enum, default_value_t = SinkKind::Log)]
    pub sink: SinkKind,
    /// Dense output rows.
    #[arg(long, default_value_t = config::DEFAULT_HEIGHT)]
    pub height: usize,
    /// Dense output columns.
    #[arg(long, default_value_t = config::DEFAULT_WIDTH)]
    pub width: usize,
    #[arg(long, default_value_t = config::DEFAULT_GRID_ROWS)]
    pub grid_rows: usize,
    #[arg(long, default_value_t = config::DEFAULT_GRID_COLS)]
    pub grid_cols: usize,
    /// Release a stuck inference after this many milliseconds.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
    /// Samples averaged for latency and FPS.
    #[arg(long, default_value_t = config::DEFAULT_PERF_WINDOW)]
    pub perf_window: usize,
    /// Capture width for test-pattern and camera sources.
    #[arg(long, default_value_t = 640)]
    pub capture_width: u32,
    /// Capture height for test-pattern and camera sources.
    #[arg(long, default_value_t = 480)]
    pub capture_height: u32,
    /// Test-pattern frame rate.
    #[arg(long, default_value_t = 50)]
    pub fps: u32,
    /// Cell sum at or above which the log sink reports a cell clear.
    #[arg(long, default_value_t = sink::DEFAULT_CLEAR_THRESHOLD)]
    pub clear_threshold: f32,
}

impl TryFrom<&Cli> for PipelineConfig {
    type Error = ConfigError;

    fn try_from(cli: &Cli) -> Result<Self, ConfigError> {
        let config = PipelineConfig {
            height: cli.height,
            width: cli.width,
            grid_rows: cli.grid_rows,
            grid_cols: cli.grid_cols,
            inference_timeout: cli.timeout_ms.map(Duration::from_millis),
            perf_window: cli.perf_window,
        };
        config.validate()?;
        Ok(config)
    }
}
