/// ESC/POS Commands (byte sequences)
const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;
const LF: u8 = 0x0a;

/// `GS v 0` raster mode (normal density)
pub const RASTER_MODE_NORMAL: u8 = 0x00;

/// Lines fed before the cutter so the last raster row clears the blade.
pub const FEED_BEFORE_CUT: u8 = 3;

/// Bytes needed for one raster row of `width` pixels (8 pixels per byte).
pub fn bytes_per_row(width: u32) -> u32 {
    width.div_ceil(8)
}

/// `GS v 0 m xL xH yL yH` header for a raster bit image.
pub fn raster_header(mode: u8, bytes_per_row: u16, height: u16) -> [u8; 8] {
    let [x_l, x_h] = bytes_per_row.to_le_bytes();
    let [y_l, y_h] = height.to_le_bytes();
    [GS, 0x76, 0x30, mode, x_l, x_h, y_l, y_h]
}

/// ESC/POS Command Builder
#[derive(Debug, Default)]
pub struct ESCPOSBuilder {
    buffer: Vec<u8>,
}

impl ESCPOSBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the built command buffer
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }

    /// Initialize printer
    pub fn initialize(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self
    }

    /// Add line feed
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        for _ in 0..lines {
            self.buffer.push(LF);
        }
        self
    }

    /// Print a pre-rendered monochrome bitmap via GS v 0.
    ///
    /// `bitmap` is sent as-is: one bit per pixel, MSB first, rows padded to
    /// `bytes_per_row`.
    pub fn raster_bitmap(&mut self, bytes_per_row: u16, height: u16, bitmap: &[u8]) -> &mut Self {
        self.buffer
            .extend_from_slice(&raster_header(RASTER_MODE_NORMAL, bytes_per_row, height));
        self.buffer.extend_from_slice(bitmap);
        self
    }

    /// Cut paper
    pub fn cut(&mut self, partial: bool) -> &mut Self {
        self.feed(FEED_BEFORE_CUT);
        self.buffer.extend_from_slice(&[GS, 0x56, if partial { 1 } else { 0 }]);
        self
    }

    /// Open cash drawer (pin 2, 50ms on / 500ms off)
    pub fn open_drawer(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x70, 0, 25, 250]);
        self
    }
}
