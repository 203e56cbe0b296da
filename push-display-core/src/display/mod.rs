//! # Display path
//!
//! Everything between a rendered bitmap and a frame on the wire.
//!
//! ## Architecture
//!
//! ```text
//! Renderer ──► encoder::encode ──► FrameBuffer ──► DeviceSession::send
//!   (render loop, ≤ 60 Hz)          (latest wins)    (delivery loop, 30 Hz)
//! ```
//!
//! ## Sub-modules
//!
//! | Module         | Purpose                                            |
//! |----------------|----------------------------------------------------|
//! | `types`        | `Bitmap`, pixel formats, display geometry          |
//! | `encoder`      | RGB → masked BGR565 wire frame transcoder          |
//! | `frame_buffer` | Two-slot latest-wins frame exchange                |
//! | `pipeline`     | Render / delivery loops driven by session state    |
//! | `pattern`      | Built-in test patterns                             |
//! | `stats`        | Delivery counters and throughput meter             |

pub mod encoder;
pub mod frame_buffer;
pub mod pattern;
pub mod pipeline;
pub mod stats;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────

pub use encoder::{WIRE_FRAME_LEN, WireFrame, encode};
pub use frame_buffer::FrameBuffer;
pub use pattern::TestPattern;
pub use pipeline::{ContentSignal, Pipeline, PipelineConfig, Renderer};
pub use stats::{PipelineStats, StatsSnapshot, ThroughputMeter};
pub use types::{Bitmap, DISPLAY_HEIGHT, DISPLAY_WIDTH, PixelFormat};
