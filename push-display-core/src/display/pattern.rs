//! Built-in test patterns usable as a [`Renderer`].

use std::str::FromStr;

use crate::display::pipeline::Renderer;
use crate::display::types::{Bitmap, DISPLAY_HEIGHT, DISPLAY_WIDTH};
use crate::error::PushError;

/// Standard 75 % colour bars, left to right.
const BARS: [[u8; 3]; 8] = [
    [191, 191, 191],
    [191, 191, 0],
    [0, 191, 191],
    [0, 191, 0],
    [191, 0, 191],
    [191, 0, 0],
    [0, 0, 191],
    [0, 0, 0],
];

/// A synthetic frame source for bring-up and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestPattern {
    /// Whole display in one colour.
    Solid([u8; 3]),
    /// Horizontal hue sweep that scrolls by `step` pixels per frame.
    Gradient { offset: u32, step: u32 },
    /// Vertical colour bars.
    Bars,
}

impl TestPattern {
    pub fn gradient() -> Self {
        TestPattern::Gradient { offset: 0, step: 8 }
    }

    /// Produce the next bitmap, advancing any animation state.
    pub fn next_bitmap(&mut self) -> Bitmap {
        match self {
            TestPattern::Solid([r, g, b]) => Bitmap::solid(*r, *g, *b),
            TestPattern::Gradient { offset, step } => {
                let shift = *offset;
                *offset = (*offset + *step) % DISPLAY_WIDTH;
                Bitmap::from_fn(|x, y| {
                    let hue = ((x + shift) % DISPLAY_WIDTH) * 1536 / DISPLAY_WIDTH;
                    let shade = 255 - (y * 128 / DISPLAY_HEIGHT) as u8;
                    scale(hue_to_rgb(hue), shade)
                })
            }
            TestPattern::Bars => {
                let bar_width = DISPLAY_WIDTH / BARS.len() as u32;
                Bitmap::from_fn(|x, _| BARS[(x / bar_width) as usize % BARS.len()])
            }
        }
    }
}

impl Renderer for TestPattern {
    fn render(&mut self, width: u32, height: u32) -> Result<Bitmap, PushError> {
        if width != DISPLAY_WIDTH || height != DISPLAY_HEIGHT {
            return Err(PushError::Render(format!(
                "test patterns only render {DISPLAY_WIDTH}x{DISPLAY_HEIGHT}, asked for {width}x{height}"
            )));
        }
        Ok(self.next_bitmap())
    }
}

impl FromStr for TestPattern {
    type Err = PushError;

    /// Accepts `gradient`, `bars`, `black`, `white`, or `solid:RRGGBB`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gradient" => Ok(TestPattern::gradient()),
            "bars" => Ok(TestPattern::Bars),
            "black" => Ok(TestPattern::Solid([0, 0, 0])),
            "white" => Ok(TestPattern::Solid([255, 255, 255])),
            other => {
                let hex = other
                    .strip_prefix("solid:")
                    .ok_or_else(|| PushError::Config(format!("unknown pattern '{s}'")))?;
                parse_hex_rgb(hex).map(TestPattern::Solid)
            }
        }
    }
}

fn parse_hex_rgb(hex: &str) -> Result<[u8; 3], PushError> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        return Err(PushError::Config(format!("colour must be RRGGBB, got '{hex}'")));
    }
    let value = u32::from_str_radix(hex, 16)
        .map_err(|e| PushError::Config(format!("bad colour '{hex}': {e}")))?;
    Ok([(value >> 16) as u8, (value >> 8) as u8, value as u8])
}

/// Hue in `0..1536` (six 256-step segments) to a saturated colour.
fn hue_to_rgb(hue: u32) -> [u8; 3] {
    let t = (hue % 256) as u8;
    match hue / 256 {
        0 => [255, t, 0],
        1 => [255 - t, 255, 0],
        2 => [0, 255, t],
        3 => [0, 255 - t, 255],
        4 => [t, 0, 255],
        _ => [255, 0, 255 - t],
    }
}

fn scale([r, g, b]: [u8; 3], shade: u8) -> [u8; 3] {
    let s = shade as u16;
    [
        (r as u16 * s / 255) as u8,
        (g as u16 * s / 255) as u8,
        (b as u16 * s / 255) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_patterns() {
        assert_eq!("bars".parse::<TestPattern>().unwrap(), TestPattern::Bars);
        assert_eq!(
            "solid:FF8000".parse::<TestPattern>().unwrap(),
            TestPattern::Solid([255, 128, 0])
        );
        assert!("plaid".parse::<TestPattern>().is_err());
        assert!("solid:12".parse::<TestPattern>().is_err());
    }

    #[test]
    fn gradient_advances_between_frames() {
        let mut pattern = TestPattern::gradient();
        let a = pattern.next_bitmap();
        let b = pattern.next_bitmap();
        assert_ne!(a, b);
    }

    #[test]
    fn bars_span_the_display() {
        let bmp = TestPattern::Bars.next_bitmap();
        assert_eq!(bmp.rgb(0, 0), BARS[0]);
        assert_eq!(bmp.rgb(DISPLAY_WIDTH - 1, 0), BARS[7]);
    }

    #[test]
    fn render_rejects_other_canvas_sizes() {
        let mut pattern = TestPattern::Bars;
        assert!(pattern.render(DISPLAY_WIDTH, DISPLAY_HEIGHT).is_ok());
        assert!(matches!(pattern.render(128, 64), Err(PushError::Render(_))));
    }
}
