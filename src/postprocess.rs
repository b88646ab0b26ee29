//! Reduction of the flat dense model output into a heatmap and grid sums.
//!
//! Everything here is pure: the same dense output always produces the same
//! heatmap and grid, and nothing is remembered between calls.

use std::ops::Index;
use std::time::Instant;

use thiserror::Error;

use crate::config::PipelineConfig;

/// Flat row-major model output of `height * width` scalars.
pub type DenseOutput = Vec<f32>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PostProcessError {
    #[error("dense output has {actual} values, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("output shape {height}x{width} overflows usize")]
    ShapeOverflow { height: usize, width: usize },
    #[error("grid {rows}x{cols} is finer than the {height}x{width} output")]
    GridTooFine {
        rows: usize,
        cols: usize,
        height: usize,
        width: usize,
    },
}

/// Dense output re-indexed column first: `heatmap[col][row]`.
///
/// Values are passed through untouched; clamping to `[0, 1]` is left to the
/// renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    height: usize,
    columns: Vec<Vec<f32>>,
}

impl Heatmap {
    /// Number of columns (outer axis).
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows in each column (inner axis).
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        self.columns.get(col)?.get(row).copied()
    }

    pub fn columns(&self) -> impl Iterator<Item = &[f32]> {
        self.columns.iter().map(Vec::as_slice)
    }

    /// Undo the transposition, yielding the original row-major sequence.
    pub fn to_row_major(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.width() * self.height);
        for row in 0..self.height {
            flat.extend(self.columns.iter().map(|column| column[row]));
        }
        flat
    }
}

impl Index<usize> for Heatmap {
    type Output = [f32];

    fn index(&self, col: usize) -> &[f32] {
        &self.columns[col]
    }
}

/// Per-cell sums over a `rows x cols` partition, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAggregate {
    pub rows: usize,
    pub cols: usize,
    pub cell_height: usize,
    pub cell_width: usize,
    height: usize,
    width: usize,
    sums: Vec<f32>,
}

impl GridAggregate {
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.sums.get(row * self.cols + col).copied()
    }

    pub fn cells(&self) -> &[f32] {
        &self.sums
    }

    pub fn total(&self) -> f32 {
        self.sums.iter().sum()
    }

    /// Rows at the bottom of the output that fall outside every cell.
    pub fn excluded_rows(&self) -> usize {
        self.height - self.rows * self.cell_height
    }

    /// Columns at the right of the output that fall outside every cell.
    pub fn excluded_cols(&self) -> usize {
        self.width - self.cols * self.cell_width
    }
}

/// Immutable result handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapResult {
    pub frame_sequence: u64,
    pub captured_at: Instant,
    pub heatmap: Heatmap,
    pub grid: GridAggregate,
}

fn check_len(dense: &[f32], height: usize, width: usize) -> Result<(), PostProcessError> {
    let expected = height
        .checked_mul(width)
        .ok_or(PostProcessError::ShapeOverflow { height, width })?;
    if dense.len() != expected {
        return Err(PostProcessError::ShapeMismatch {
            expected,
            actual: dense.len(),
        });
    }
    Ok(())
}

/// Move flat index `row * width + col` to `heatmap[col][row]`.
pub fn convert_to_grid(
    dense: &[f32],
    height: usize,
    width: usize,
) -> Result<Heatmap, PostProcessError> {
    check_len(dense, height, width)?;

    let mut columns = vec![Vec::with_capacity(height); width];
    if width == 0 {
        return Ok(Heatmap { height, columns });
    }
    for row in dense.chunks_exact(width) {
        for (column, &value) in columns.iter_mut().zip(row) {
            column.push(value);
        }
    }

    Ok(Heatmap { height, columns })
}

/// Sum each `height / rows` by `width / cols` cell.
///
/// Cell sizes truncate, so when the grid does not divide the output evenly
/// the trailing `height % rows` rows and `width % cols` columns belong to no
/// cell and are left out of every sum. A grid with more rows than `height`
/// or more columns than `width` is rejected.
pub fn compute_grid_aggregate(
    dense: &[f32],
    height: usize,
    width: usize,
    rows: usize,
    cols: usize,
) -> Result<GridAggregate, PostProcessError> {
    check_len(dense, height, width)?;
    if rows > height || cols > width {
        return Err(PostProcessError::GridTooFine {
            rows,
            cols,
            height,
            width,
        });
    }

    let cell_height = if rows == 0 { 0 } else { height / rows };
    let cell_width = if cols == 0 { 0 } else { width / cols };
    let mut sums = vec![0.0f32; rows * cols];

    for grid_row in 0..rows {
        for grid_col in 0..cols {
            let start_y = grid_row * cell_height;
            let start_x = grid_col * cell_width;
            let mut sum = 0.0f32;
            for y in start_y..start_y + cell_height {
                let line = &dense[y * width..(y + 1) * width];
                sum += line[start_x..start_x + cell_width].iter().sum::<f32>();
            }
            sums[grid_row * cols + grid_col] = sum;
        }
    }

    Ok(GridAggregate {
        rows,
        cols,
        cell_height,
        cell_width,
        height,
        width,
        sums,
    })
}

/// Shape-bound post-processor built once from a validated config.
#[derive(Debug, Clone)]
pub struct HeatmapPostProcessor {
    height: usize,
    width: usize,
    rows: usize,
    cols: usize,
}

impl HeatmapPostProcessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            height: config.height,
            width: config.width,
            rows: config.grid_rows,
            cols: config.grid_cols,
        }
    }

    pub fn process(
        &self,
        frame_sequence: u64,
        captured_at: Instant,
        dense: DenseOutput,
    ) -> Result<HeatmapResult, PostProcessError> {
        let grid = compute_grid_aggregate(&dense, self.height, self.width, self.rows, self.cols)?;
        let heatmap = convert_to_grid(&dense, self.height, self.width)?;
        Ok(HeatmapResult {
            frame_sequence,
            captured_at,
            heatmap,
            grid,
        })
    }
}
