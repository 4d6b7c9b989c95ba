//! Bouncing white stripe test pattern

use super::pool::FrameBuffer;

/// Default stripe thickness in rows
pub const DEFAULT_STRIPE_HEIGHT: u32 = 10;

/// Value written to every byte of the stripe (white, full alpha)
const STRIPE_FILL: u8 = 0xFF;

/// Draws a full-width stripe that bounces between the top and bottom edges.
///
/// The stripe starts at row 0 moving down. Each `draw` renders the current
/// position and then advances by one row, reversing at either edge, so the
/// motion repeats every `2 * (height - stripe_height)` frames.
#[derive(Debug, Clone)]
pub struct StripeSynthesizer {
    height: u32,
    stripe_height: u32,
    stripe_row: u32,
    ascending: bool,
}

impl StripeSynthesizer {
    pub fn new(height: u32, stripe_height: u32) -> Self {
        Self {
            height,
            stripe_height: stripe_height.min(height),
            stripe_row: 0,
            ascending: false,
        }
    }

    /// First row of the stripe on the next `draw`
    pub fn stripe_row(&self) -> u32 {
        self.stripe_row
    }

    /// True while the stripe moves towards row 0
    pub fn is_ascending(&self) -> bool {
        self.ascending
    }

    /// Highest row the stripe may start at
    pub fn max_row(&self) -> u32 {
        self.height - self.stripe_height
    }

    /// Frames until the motion repeats
    pub fn period(&self) -> u32 {
        2 * self.max_row()
    }

    /// Clear `buffer`, paint the stripe at the current row, then advance.
    pub fn draw(&mut self, buffer: &mut FrameBuffer) {
        let stride = buffer.row_stride();
        let rows = buffer.height().min(self.height) as usize;
        let row_bytes = buffer.row_bytes().min(stride);
        let start = self.stripe_row as usize;
        let end = (start + self.stripe_height as usize).min(rows);

        let data = buffer.as_mut_slice();
        data.fill(0);
        for row in data.chunks_exact_mut(stride).take(end).skip(start) {
            row[..row_bytes].fill(STRIPE_FILL);
        }

        self.advance();
    }

    /// Move the stripe one row without drawing
    pub fn advance(&mut self) {
        if self.max_row() == 0 {
            return;
        }
        if self.ascending {
            self.stripe_row -= 1;
            self.ascending = self.stripe_row > 0;
        } else {
            self.stripe_row += 1;
            self.ascending = self.stripe_row >= self.max_row();
        }
    }
}
