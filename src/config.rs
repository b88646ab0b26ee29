//! Shape and scheduling parameters shared by every pipeline stage.

use std::time::Duration;

use thiserror::Error;

/// Output height produced by the reference depth model.
pub const DEFAULT_HEIGHT: usize = 128;
/// Output width produced by the reference depth model.
pub const DEFAULT_WIDTH: usize = 160;
pub const DEFAULT_GRID_ROWS: usize = 3;
pub const DEFAULT_GRID_COLS: usize = 3;
/// Number of recent samples the performance tracker averages over.
pub const DEFAULT_PERF_WINDOW: usize = 30;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("output shape must be non-empty (got {height}x{width})")]
    EmptyShape { height: usize, width: usize },
    #[error("grid must have at least one row and one column (got {rows}x{cols})")]
    EmptyGrid { rows: usize, cols: usize },
    #[error("grid {rows}x{cols} is finer than the {height}x{width} output")]
    GridTooFine {
        rows: usize,
        cols: usize,
        height: usize,
        width: usize,
    },
    #[error("performance window must hold at least one sample")]
    EmptyPerfWindow,
    #[error("inference timeout must be non-zero")]
    ZeroTimeout,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Rows in the dense model output.
    pub height: usize,
    /// Columns in the dense model output.
    pub width: usize,
    pub grid_rows: usize,
    pub grid_cols: usize,
    /// Force-clear an in-flight frame after this long. `None` waits forever.
    pub inference_timeout: Option<Duration>,
    pub perf_window: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            height: DEFAULT_HEIGHT,
            width: DEFAULT_WIDTH,
            grid_rows: DEFAULT_GRID_ROWS,
            grid_cols: DEFAULT_GRID_COLS,
            inference_timeout: None,
            perf_window: DEFAULT_PERF_WINDOW,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.height == 0 || self.width == 0 {
            return Err(ConfigError::EmptyShape {
                height: self.height,
                width: self.width,
            });
        }
        if self.grid_rows == 0 || self.grid_cols == 0 {
            return Err(ConfigError::EmptyGrid {
                rows: self.grid_rows,
                cols: self.grid_cols,
            });
        }
        // A zero-sized cell would silently aggregate nothing.
        if self.grid_rows > self.height || self.grid_cols > self.width {
            return Err(ConfigError::GridTooFine {
                rows: self.grid_rows,
                cols: self.grid_cols,
                height: self.height,
                width: self.width,
            });
        }
        if self.perf_window == 0 {
            return Err(ConfigError::EmptyPerfWindow);
        }
        if self.inference_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Expected length of every dense output.
    pub fn dense_len(&self) -> usize {
        self.height * self.width
    }
}
