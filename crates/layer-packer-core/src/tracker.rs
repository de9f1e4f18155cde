use crate::error::{LayerPackerError, Result};
use crate::model::Rect;
use tracing::error;

/// Used/free map of one layer.
///
/// The layer is divided into square cells of `cell_size` pixels (1 by default). A
/// rectangle is used iff every cell it touches is used, and cells only change through
/// [`mark_used`](Self::mark_used) / [`mark_free`](Self::mark_free). Placement origins
/// returned by [`find_free`](Self::find_free) are always multiples of `cell_size`.
#[derive(Debug, Clone)]
pub struct FreeRectTracker {
    width: u32,
    height: u32,
    cell: u32,
    cols: u32,
    rows: u32,
    cells: Vec<bool>,
}

impl FreeRectTracker {
    /// Per-pixel tracker of a `width`x`height` layer, all free.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::with_cell_size(width, height, 1)
    }

    pub fn with_cell_size(width: u32, height: u32, cell_size: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(LayerPackerError::InvalidDimensions { width, height });
        }
        if cell_size == 0 {
            return Err(LayerPackerError::InvalidConfig(
                "cell_size must be at least 1".into(),
            ));
        }
        let cols = width.div_ceil(cell_size);
        let rows = height.div_ceil(cell_size);
        Ok(Self {
            width,
            height,
            cell: cell_size,
            cols,
            rows,
            cells: vec![false; cols as usize * rows as usize],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cell_size(&self) -> u32 {
        self.cell
    }

    /// Marks every cell covered by `rect` as used.
    pub fn mark_used(&mut self, rect: &Rect) -> Result<()> {
        self.set(rect, true)
    }

    /// Marks every cell covered by `rect` as free.
    pub fn mark_free(&mut self, rect: &Rect) -> Result<()> {
        self.set(rect, false)
    }

    fn set(&mut self, rect: &Rect, used: bool) -> Result<()> {
        if !rect.fits_within(self.width, self.height) {
            error!(
                ?rect,
                width = self.width,
                height = self.height,
                "rectangle outside layer; tracker left unchanged"
            );
            return Err(LayerPackerError::OutOfBounds {
                rect: *rect,
                width: self.width,
                height: self.height,
            });
        }
        if rect.is_empty() {
            return Ok(());
        }
        let (c0, r0, c1, r1) = self.span(rect);
        for r in r0..r1 {
            let row = (r * self.cols) as usize;
            self.cells[row + c0 as usize..row + c1 as usize].fill(used);
        }
        Ok(())
    }

    /// Cell span `[c0, c1) x [r0, r1)` covered by an in-bounds rectangle.
    fn span(&self, rect: &Rect) -> (u32, u32, u32, u32) {
        (
            rect.x / self.cell,
            rect.y / self.cell,
            (rect.x + rect.w).div_ceil(self.cell),
            (rect.y + rect.h).div_ceil(self.cell),
        )
    }

    /// Returns the row-major first (smallest y, then smallest x) origin where a `w`x`h`
    /// rectangle is entirely free, or `None`.
    ///
    /// When a candidate window hits a used cell the scan resumes just past that cell's
    /// column, since every origin in between would cover it too.
    pub fn find_free(&self, w: u32, h: u32) -> Option<(u32, u32)> {
        if w > self.width || h > self.height {
            return None;
        }
        if w == 0 || h == 0 {
            return Some((0, 0));
        }
        let cw = w.div_ceil(self.cell) as usize;
        let ch = h.div_ceil(self.cell);
        let max_cx = (self.width - w) / self.cell;
        let max_cy = (self.height - h) / self.cell;
        for cy in 0..=max_cy {
            let mut cx = 0;
            'origin: while cx <= max_cx {
                for dy in 0..ch {
                    let row = ((cy + dy) * self.cols + cx) as usize;
                    if let Some(off) = self.cells[row..row + cw].iter().rposition(|&u| u) {
                        cx += off as u32 + 1;
                        continue 'origin;
                    }
                }
                return Some((cx * self.cell, cy * self.cell));
            }
        }
        None
    }

    /// True if `rect` lies inside the layer and touches no used cell.
    pub fn is_free(&self, rect: &Rect) -> bool {
        if !rect.fits_within(self.width, self.height) {
            return false;
        }
        if rect.is_empty() {
            return true;
        }
        let (c0, r0, c1, r1) = self.span(rect);
        (r0..r1).all(|r| {
            let row = (r * self.cols) as usize;
            self.cells[row + c0 as usize..row + c1 as usize]
                .iter()
                .all(|&u| !u)
        })
    }

    /// Smallest origin-anchored width/height containing every used cell; `(0, 0)` when empty.
    pub fn used_bounds(&self) -> (u32, u32) {
        let cols = self.cols as usize;
        let Some(last_row) = (0..self.rows as usize)
            .rev()
            .find(|&r| self.cells[r * cols..(r + 1) * cols].iter().any(|&u| u))
        else {
            return (0, 0);
        };
        let last_col = (0..cols)
            .rev()
            .find(|&c| (0..=last_row).any(|r| self.cells[r * cols + c]))
            .unwrap_or(0);
        (
            ((last_col as u32 + 1) * self.cell).min(self.width),
            ((last_row as u32 + 1) * self.cell).min(self.height),
        )
    }

    /// Number of used cells.
    pub fn used_cells(&self) -> usize {
        self.cells.iter().filter(|&&u| u).count()
    }

    /// Frees the whole layer.
    pub fn clear(&mut self) {
        self.cells.fill(false);
    }

    /// ASCII dump of the cells under `rect` (`*` used, ` ` free), one line per cell row.
    pub fn render_ascii(&self, rect: &Rect) -> String {
        let mut out = String::new();
        if !rect.fits_within(self.width, self.height) || rect.is_empty() {
            return out;
        }
        let (c0, r0, c1, r1) = self.span(rect);
        for r in r0..r1 {
            for c in c0..c1 {
                out.push(if self.cells[(r * self.cols + c) as usize] {
                    '*'
                } else {
                    ' '
                });
            }
            out.push('\n');
        }
        out
    }
}
