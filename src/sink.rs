//! Destinations for finished heatmaps.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::postprocess::HeatmapResult;

/// Receives each finished result by value. Rendering, clamping, and colour
/// mapping all happen behind this trait.
pub trait ResultSink {
    fn publish(&mut self, result: HeatmapResult);
}

impl<F: FnMut(HeatmapResult)> ResultSink for F {
    fn publish(&mut self, result: HeatmapResult) {
        self(result)
    }
}

/// Keeps only the most recent result; older ones are released on replace.
#[derive(Debug, Clone, Default)]
pub struct LatestResult {
    slot: Arc<Mutex<Option<Arc<HeatmapResult>>>>,
}

impl LatestResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Arc<HeatmapResult>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ResultSink for LatestResult {
    fn publish(&mut self, result: HeatmapResult) {
        let result = Arc::new(result);
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
    }
}

/// Cell sum at or above which a cell is reported clear.
pub const DEFAULT_CLEAR_THRESHOLD: f32 = 2500.0;

/// Logs the grid sums of every result, flagging each cell clear or blocked
/// against `threshold`.
#[derive(Debug, Clone)]
pub struct LogSink {
    pub threshold: f32,
}

impl Default for LogSink {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CLEAR_THRESHOLD,
        }
    }
}

impl LogSink {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// One character per cell, rows separated by `/`: `o` clear, `X` blocked.
    pub fn cell_flags(&self, result: &HeatmapResult) -> String {
        result
            .grid
            .cells()
            .chunks(result.grid.cols.max(1))
            .map(|row| {
                row.iter()
                    .map(|&sum| if sum >= self.threshold { 'o' } else { 'X' })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl ResultSink for LogSink {
    fn publish(&mut self, result: HeatmapResult) {
        debug!(
            sequence = result.frame_sequence,
            rows = result.grid.rows,
            cols = result.grid.cols,
            cells = ?result.grid.cells(),
            flags = %self.cell_flags(&result),
            "Heatmap"
        );
    }
}
