//! Source bitmap types handed from the renderer to the transcoder.
//!
//! A [`Bitmap`] is the renderer's output: an uncompressed 8-bit-per-sample
//! image. It is distinct from [`WireFrame`](crate::display::WireFrame),
//! which is the device-format payload.

use crate::error::EncodingError;

/// Display width in pixels.
pub const DISPLAY_WIDTH: u32 = 960;
/// Display height in pixels.
pub const DISPLAY_HEIGHT: u32 = 160;

// ── PixelFormat ──────────────────────────────────────────────────

/// Sample layout of a source bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    #[default]
    Rgba8,
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// Byte offsets of red, green and blue within one pixel.
    pub const fn rgb_offsets(self) -> (usize, usize, usize) {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Rgb8 => (0, 1, 2),
            PixelFormat::Bgra8 => (2, 1, 0),
        }
    }
}

// ── Bitmap ───────────────────────────────────────────────────────

/// A rendered image ready for transcoding.
///
/// The `data` buffer holds `height` rows of `stride` bytes each.
/// `stride` may be larger than `width * bytes_per_pixel` when the
/// renderer pads its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Bitmap {
    /// Wrap a renderer buffer, checking that it is internally consistent.
    ///
    /// Does not check the 960×160 contract; the transcoder does that.
    pub fn new(
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, EncodingError> {
        let min_stride = width as usize * format.bytes_per_pixel();
        if (stride as usize) < min_stride || data.len() < stride as usize * height as usize {
            return Err(EncodingError::InvalidDimensions {
                width,
                height,
                stride,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            data,
        })
    }

    /// A tightly packed RGBA bitmap at display size, filled with one colour.
    pub fn solid(red: u8, green: u8, blue: u8) -> Self {
        let pixels = (DISPLAY_WIDTH * DISPLAY_HEIGHT) as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&[red, green, blue, 0xFF]);
        }
        Self {
            width: DISPLAY_WIDTH,
            height: DISPLAY_HEIGHT,
            stride: DISPLAY_WIDTH * 4,
            format: PixelFormat::Rgba8,
            data,
        }
    }

    /// Build a display-size RGBA bitmap from a per-pixel colour function.
    pub fn from_fn(mut f: impl FnMut(u32, u32) -> [u8; 3]) -> Self {
        let mut data = Vec::with_capacity((DISPLAY_WIDTH * DISPLAY_HEIGHT * 4) as usize);
        for y in 0..DISPLAY_HEIGHT {
            for x in 0..DISPLAY_WIDTH {
                let [r, g, b] = f(x, y);
                data.extend_from_slice(&[r, g, b, 0xFF]);
            }
        }
        Self {
            width: DISPLAY_WIDTH,
            height: DISPLAY_HEIGHT,
            stride: DISPLAY_WIDTH * 4,
            format: PixelFormat::Rgba8,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row pitch in **bytes**.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns a row slice (including possible padding bytes).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        &self.data[start..start + self.stride as usize]
    }

    /// Red, green and blue samples at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let bpp = self.format.bytes_per_pixel();
        let (r, g, b) = self.format.rgb_offsets();
        let offset = y as usize * self.stride as usize + x as usize * bpp;
        [
            self.data[offset + r],
            self.data[offset + g],
            self.data[offset + b],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_fills_every_pixel() {
        let bmp = Bitmap::solid(128, 64, 32);
        assert_eq!(bmp.width(), DISPLAY_WIDTH);
        assert_eq!(bmp.height(), DISPLAY_HEIGHT);
        assert_eq!(&bmp.data()[..4], &[128, 64, 32, 255]);
        assert_eq!(bmp.rgb(959, 159), [128, 64, 32]);
    }

    #[test]
    fn bgra_offsets_swap_red_and_blue() {
        let bmp = Bitmap::new(1, 1, 4, PixelFormat::Bgra8, vec![10, 20, 30, 255]).unwrap();
        assert_eq!(bmp.rgb(0, 0), [30, 20, 10]);
    }

    #[test]
    fn padded_stride_is_accepted() {
        let stride = DISPLAY_WIDTH * 4 + 64;
        let data = vec![0u8; (stride * DISPLAY_HEIGHT) as usize];
        let bmp = Bitmap::new(DISPLAY_WIDTH, DISPLAY_HEIGHT, stride, PixelFormat::Rgba8, data)
            .unwrap();
        assert_eq!(bmp.row(1).len(), stride as usize);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = Bitmap::new(4, 4, 16, PixelFormat::Rgba8, vec![0u8; 63]).unwrap_err();
        assert!(matches!(err, EncodingError::InvalidDimensions { len: 63, .. }));
    }

    #[test]
    fn short_stride_is_rejected() {
        assert!(Bitmap::new(4, 1, 12, PixelFormat::Rgba8, vec![0u8; 16]).is_err());
    }
}
