//! # push-display-core
//!
//! Streams rendered frames to the 960×160 display of an Ableton Push 2,
//! Push 3 or Push 3 SA over USB bulk transfers.
//!
//! This crate contains:
//! - **Display**: `Bitmap`, the BGR565 wire `encode`r, the `FrameBuffer`
//!   double buffer, test patterns and the render / delivery `Pipeline`
//! - **Session**: `DeviceSession` with exclusive connect, hotplug handling
//!   and a debounced reconnect monitor
//! - **Transport**: the `Transport` / `BulkPipe` bus abstraction, frame
//!   header framing, and an in-process `SimulatedBus`
//! - **Device**: the supported `PushDevice` catalogue
//! - **Error**: `PushError`, typed `thiserror`-based error hierarchy

pub mod device;
pub mod display;
pub mod error;
pub mod session;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use device::{BULK_EP_OUT, PushDevice, TRANSFER_TIMEOUT, VENDOR_ID};
pub use display::{
    Bitmap, ContentSignal, DISPLAY_HEIGHT, DISPLAY_WIDTH, FrameBuffer, PixelFormat, Pipeline,
    PipelineConfig, Renderer, StatsSnapshot, TestPattern, WIRE_FRAME_LEN, WireFrame, encode,
};
pub use error::{DeviceError, EncodingError, PushError, TransportError};
pub use session::{DeviceSession, SessionConfig, SessionState};
pub use transport::{BulkPipe, BusDevice, HotplugEvent, SimulatedBus, Transport};
