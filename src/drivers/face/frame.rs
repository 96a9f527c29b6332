//! 8x8 monochrome frame buffer and the drawing primitives used by the face.

use serde_json::Value;

use crate::module::ModuleError;

/// Width and height of the matrix.
pub const SIZE: i32 = 8;

/// One bit per pixel, row-major. Bit 7 of a row byte is the leftmost column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Frame([u8; 8]);

impl Frame {
    pub const BLANK: Frame = Frame([0; 8]);

    pub const fn from_rows(rows: [u8; 8]) -> Self {
        Self(rows)
    }

    pub fn rows(&self) -> [u8; 8] {
        self.0
    }

    /// Parses 8 rows of 8 cells. Cells are 0/1 or booleans.
    pub fn from_grid(grid: &Value) -> Result<Self, ModuleError> {
        let shape = || ModuleError::Invalid("Grid must be 8 rows of 8 cells".into());

        let rows = grid.as_array().filter(|rows| rows.len() == 8).ok_or_else(shape)?;
        let mut frame = Frame::BLANK;
        for (y, row) in rows.iter().enumerate() {
            let cells = row.as_array().filter(|cells| cells.len() == 8).ok_or_else(shape)?;
            for (x, cell) in cells.iter().enumerate() {
                let on = match cell {
                    Value::Bool(on) => *on,
                    other => other.as_i64().ok_or_else(shape)? != 0,
                };
                frame.set(x as i32, y as i32, on);
            }
        }
        Ok(frame)
    }

    pub fn get(&self, x: i32, y: i32) -> bool {
        in_bounds(x, y) && self.0[y as usize] & mask(x) != 0
    }

    /// Out-of-range coordinates are ignored.
    pub fn set(&mut self, x: i32, y: i32, on: bool) {
        if !in_bounds(x, y) {
            return;
        }
        if on {
            self.0[y as usize] |= mask(x);
        } else {
            self.0[y as usize] &= !mask(x);
        }
    }

    pub fn invert(&mut self) {
        for row in &mut self.0 {
            *row = !*row;
        }
    }

    /// Number of lit pixels.
    pub fn lit(&self) -> u32 {
        self.0.iter().map(|row| row.count_ones()).sum()
    }

    /// Bresenham line, both endpoints included.
    pub fn line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);

        loop {
            self.set(x, y, true);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Axis-aligned rectangle between two opposite corners.
    pub fn rect(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, fill: bool) {
        let (left, right) = ordered(x0, x1);
        let (top, bottom) = ordered(y0, y1);

        for y in top.max(0)..=bottom.min(SIZE - 1) {
            for x in left.max(0)..=right.min(SIZE - 1) {
                if fill || y == top || y == bottom || x == left || x == right {
                    self.set(x, y, true);
                }
            }
        }
    }

    /// Ellipse inscribed in the bounding box of two opposite corners.
    pub fn ellipse(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, fill: bool) {
        let (left, right) = ordered(x0, x1);
        let (top, bottom) = ordered(y0, y1);
        let cx = f64::from(left + right) / 2.0;
        let cy = f64::from(top + bottom) / 2.0;
        let rx = f64::from(right - left) / 2.0 + 0.5;
        let ry = f64::from(bottom - top) / 2.0 + 0.5;

        let inside = |x: i32, y: i32| {
            let nx = (f64::from(x) - cx) / rx;
            let ny = (f64::from(y) - cy) / ry;
            nx * nx + ny * ny <= 1.0
        };

        for y in top.max(0)..=bottom.min(SIZE - 1) {
            for x in left.max(0)..=right.min(SIZE - 1) {
                if !inside(x, y) {
                    continue;
                }
                let edge = [(1, 0), (-1, 0), (0, 1), (0, -1)]
                    .iter()
                    .any(|&(dx, dy)| !inside(x + dx, y + dy));
                if fill || edge {
                    self.set(x, y, true);
                }
            }
        }
    }

    /// Copies the lit pixels of `glyph` with its top-left corner at `(x, y)`.
    pub fn stamp(&mut self, glyph: &[&str], x: i32, y: i32) {
        for (dy, row) in glyph.iter().enumerate() {
            for (dx, cell) in row.chars().enumerate() {
                if cell == '#' {
                    self.set(x + dx as i32, y + dy as i32, true);
                }
            }
        }
    }
}

fn in_bounds(x: i32, y: i32) -> bool {
    (0..SIZE).contains(&x) && (0..SIZE).contains(&y)
}

fn mask(x: i32) -> u8 {
    0x80 >> x
}

fn ordered(a: i32, b: i32) -> (i32, i32) {
    if a <= b { (a, b) } else { (b, a) }
}
