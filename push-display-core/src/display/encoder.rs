//! Transcoder from rendered bitmaps to the device wire format.
//!
//! Each output row is 2048 bytes: 960 little-endian 16-bit pixels
//! followed by 128 bytes of zero padding. Pixels are packed 5-6-5
//! (red in the low bits, blue in the high bits) and every pixel byte is
//! XORed with a free-running 4-byte mask:
//!
//! ```text
//! byte 0: GGGRRRRR ^ mask[(2x)   % 4]
//! byte 1: BBBBBGGG ^ mask[(2x+1) % 4]
//! ```

use bytes::Bytes;

use crate::display::types::{Bitmap, DISPLAY_HEIGHT, DISPLAY_WIDTH};
use crate::error::EncodingError;

// ── Constants ────────────────────────────────────────────────────

/// Pixel bytes per row.
pub const LINE_DATA_LEN: usize = DISPLAY_WIDTH as usize * 2;
/// Total bytes per row including trailing padding.
pub const LINE_PITCH: usize = LINE_DATA_LEN + 128;
/// Length of every encoded frame.
pub const WIRE_FRAME_LEN: usize = LINE_PITCH * DISPLAY_HEIGHT as usize;
/// Obfuscation mask, applied byte by byte.
pub const XOR_MASK: [u8; 4] = [0xE7, 0xF3, 0xE7, 0xFF];

// ── WireFrame ────────────────────────────────────────────────────

/// One encoded display frame, always [`WIRE_FRAME_LEN`] bytes.
///
/// Backed by [`Bytes`], so clones share the buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct WireFrame(Bytes);

impl WireFrame {
    /// The all-black frame used as keep-alive.
    pub fn black() -> Self {
        Self::solid(0, 0, 0)
    }

    /// A frame filled with a single colour.
    pub fn solid(red: u8, green: u8, blue: u8) -> Self {
        let [lo, hi] = pack_rgb565(red, green, blue);
        let mut out = vec![0u8; WIRE_FRAME_LEN];
        for line in out.chunks_exact_mut(LINE_PITCH) {
            for (i, byte) in line[..LINE_DATA_LEN].iter_mut().enumerate() {
                let raw = if i % 2 == 0 { lo } else { hi };
                *byte = raw ^ XOR_MASK[i % 4];
            }
        }
        Self(Bytes::from(out))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl AsRef<[u8]> for WireFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for WireFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireFrame")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

// ── Encoding ─────────────────────────────────────────────────────

/// Pack one pixel into its two unmasked wire bytes (low, high).
#[inline]
pub fn pack_rgb565(red: u8, green: u8, blue: u8) -> [u8; 2] {
    let r5 = red >> 3;
    let g6 = green >> 2;
    let b5 = blue >> 3;
    [(g6 << 5) | r5, (b5 << 3) | (g6 >> 3)]
}

/// Encode a display-size bitmap into a [`WireFrame`].
///
/// Pixels beyond 960×160 in a larger bitmap are ignored.
pub fn encode(bitmap: &Bitmap) -> Result<WireFrame, EncodingError> {
    if bitmap.width() < DISPLAY_WIDTH || bitmap.height() < DISPLAY_HEIGHT {
        return Err(EncodingError::InvalidDimensions {
            width: bitmap.width(),
            height: bitmap.height(),
            stride: bitmap.stride(),
            len: bitmap.data().len(),
        });
    }

    let bpp = bitmap.format().bytes_per_pixel();
    let (ro, go, bo) = bitmap.format().rgb_offsets();
    let mut out = vec![0u8; WIRE_FRAME_LEN];

    for (y, line) in out.chunks_exact_mut(LINE_PITCH).enumerate() {
        let src = bitmap.row(y as u32);
        // 1920 is a multiple of 4, so the mask phase is 0 at every row start.
        let mut phase = 0usize;
        for (x, dst) in line[..LINE_DATA_LEN].chunks_exact_mut(2).enumerate() {
            let px = &src[x * bpp..x * bpp + bpp];
            let [lo, hi] = pack_rgb565(px[ro], px[go], px[bo]);
            dst[0] = lo ^ XOR_MASK[phase];
            phase = (phase + 1) & 3;
            dst[1] = hi ^ XOR_MASK[phase];
            phase = (phase + 1) & 3;
        }
    }

    Ok(WireFrame(Bytes::from(out)))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::types::PixelFormat;

    fn first_two(r: u8, g: u8, b: u8) -> [u8; 2] {
        let frame = encode(&Bitmap::solid(r, g, b)).unwrap();
        [frame.as_bytes()[0], frame.as_bytes()[1]]
    }

    #[test]
    fn output_length_is_fixed() {
        assert_eq!(WIRE_FRAME_LEN, 327_680);
        for (r, g, b) in [(0, 0, 0), (255, 255, 255), (17, 99, 201)] {
            assert_eq!(encode(&Bitmap::solid(r, g, b)).unwrap().len(), WIRE_FRAME_LEN);
        }
    }

    #[test]
    fn black_is_bare_mask() {
        let frame = encode(&Bitmap::solid(0, 0, 0)).unwrap();
        assert_eq!(&frame.as_bytes()[..6], &[0xE7, 0xF3, 0xE7, 0xFF, 0xE7, 0xF3]);
    }

    #[test]
    fn primary_colours() {
        assert_eq!(first_two(255, 255, 255), [0xFF ^ 0xE7, 0xFF ^ 0xF3]);
        assert_eq!(first_two(255, 0, 0), [0x1F ^ 0xE7, 0x00 ^ 0xF3]);
        assert_eq!(first_two(0, 255, 0), [0xE0 ^ 0xE7, 0x07 ^ 0xF3]);
        assert_eq!(first_two(0, 0, 255), [0x00 ^ 0xE7, 0xF8 ^ 0xF3]);
    }

    #[test]
    fn second_pixel_uses_second_half_of_mask() {
        let frame = encode(&Bitmap::solid(255, 255, 255)).unwrap();
        assert_eq!(&frame.as_bytes()[2..4], &[0xFF ^ 0xE7, 0xFF ^ 0xFF]);
    }

    #[test]
    fn channels_are_truncated() {
        // 0x07 >> 3 == 0 and 0x03 >> 2 == 0: low bits never round up.
        assert_eq!(first_two(0x07, 0x03, 0x07), [0xE7, 0xF3]);
    }

    #[test]
    fn row_padding_is_zero() {
        let frame = encode(&Bitmap::from_fn(|x, y| [x as u8, y as u8, 0xAA])).unwrap();
        for line in frame.as_bytes().chunks_exact(LINE_PITCH) {
            assert!(line[LINE_DATA_LEN..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn encoding_is_idempotent() {
        let bmp = Bitmap::from_fn(|x, y| [(x * 7) as u8, (y * 3) as u8, (x ^ y) as u8]);
        assert_eq!(encode(&bmp).unwrap(), encode(&bmp).unwrap());
    }

    #[test]
    fn solid_frame_matches_encoded_bitmap() {
        assert_eq!(WireFrame::black(), encode(&Bitmap::solid(0, 0, 0)).unwrap());
        assert_eq!(
            WireFrame::solid(12, 200, 77),
            encode(&Bitmap::solid(12, 200, 77)).unwrap()
        );
    }

    #[test]
    fn padded_stride_and_bgra_source() {
        let stride = DISPLAY_WIDTH * 4 + 32;
        let mut data = vec![0u8; (stride * DISPLAY_HEIGHT) as usize];
        for y in 0..DISPLAY_HEIGHT as usize {
            for x in 0..DISPLAY_WIDTH as usize {
                let o = y * stride as usize + x * 4;
                data[o..o + 4].copy_from_slice(&[255, 0, 0, 255]); // blue in BGRA
            }
        }
        let bmp =
            Bitmap::new(DISPLAY_WIDTH, DISPLAY_HEIGHT, stride, PixelFormat::Bgra8, data).unwrap();
        assert_eq!(encode(&bmp).unwrap(), WireFrame::solid(0, 0, 255));
    }

    #[test]
    fn undersized_bitmap_is_rejected() {
        let bmp = Bitmap::new(320, 160, 1280, PixelFormat::Rgba8, vec![0; 1280 * 160]).unwrap();
        assert!(matches!(
            encode(&bmp),
            Err(EncodingError::InvalidDimensions { width: 320, .. })
        ));
    }
}
