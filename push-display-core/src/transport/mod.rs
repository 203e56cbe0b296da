//! Bus transport abstraction and the display wire framing.
//!
//! The actual USB stack lives behind [`Transport`]; this crate only needs
//! discovery, an exclusive open of the bulk-out pipe, bounded blocking
//! writes and hotplug notifications. All calls are blocking and are made
//! from the blocking thread pool, never from a render task.
//!
//! ## Wire format
//!
//! Every frame transfer is two bulk-out writes on [`BULK_EP_OUT`]:
//!
//! ```text
//! header:  16 bytes   FF CC AA 88 00 00 00 00 00 00 00 00 00 00 00 00
//! payload: 327680 B   160 rows × (1920 pixel bytes + 128 zero bytes)
//! ```
//!
//! [`BULK_EP_OUT`]: crate::device::BULK_EP_OUT

pub mod sim;

use std::time::Duration;

use tokio::sync::mpsc;

use crate::device::{BULK_EP_OUT, TRANSFER_TIMEOUT};
use crate::display::encoder::WireFrame;
use crate::error::TransportError;

pub use sim::SimulatedBus;

// ── Frame header ─────────────────────────────────────────────────

/// Size of the frame header on the wire.
pub const FRAME_HEADER_LEN: usize = 16;

/// Constant preamble written before every frame.
pub const FRAME_HEADER: [u8; FRAME_HEADER_LEN] = [
    0xFF, 0xCC, 0xAA, 0x88, //
    0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00,
];

// ── Bus types ────────────────────────────────────────────────────

/// A device instance present on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Bus-specific location (port path hash, address, ...).
    pub location: u32,
}

/// Bounds for a single bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTimeouts {
    /// Longest wait for the device to accept the first byte.
    pub no_data: Duration,
    /// Longest wait for the whole transfer.
    pub completion: Duration,
}

impl Default for TransferTimeouts {
    fn default() -> Self {
        Self {
            no_data: TRANSFER_TIMEOUT,
            completion: TRANSFER_TIMEOUT,
        }
    }
}

/// Bus arrival / removal notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    Arrived(BusDevice),
    Removed(BusDevice),
}

impl HotplugEvent {
    pub fn device(&self) -> BusDevice {
        match self {
            HotplugEvent::Arrived(d) | HotplugEvent::Removed(d) => *d,
        }
    }
}

// ── Traits ───────────────────────────────────────────────────────

/// Access to a hot-pluggable bus.
pub trait Transport: Send + Sync {
    /// Devices currently attached that match the vendor / product pair.
    fn discover(&self, vendor_id: u16, product_id: u16) -> Vec<BusDevice>;

    /// Open the device's bulk-out pipe. `exclusive` seizes the
    /// interface from any other client.
    fn open(&self, device: &BusDevice, exclusive: bool)
    -> Result<Box<dyn BulkPipe>, TransportError>;

    /// Subscribe to arrival / removal notifications for `vendor_id`.
    fn subscribe_hotplug(&self, vendor_id: u16) -> mpsc::UnboundedReceiver<HotplugEvent>;
}

/// An open handle on a device's bulk-out pipe.
///
/// Dropping the handle must release the device; [`close`](Self::close)
/// does so eagerly and must be idempotent.
pub trait BulkPipe: Send {
    /// Blocking write bounded by `timeouts`.
    fn write(
        &mut self,
        pipe: u8,
        bytes: &[u8],
        timeouts: TransferTimeouts,
    ) -> Result<(), TransportError>;

    fn close(&mut self);
}

/// Write one frame transfer: the header, then the payload, as two
/// separate bulk writes each under its own timeout.
pub fn write_frame(pipe: &mut dyn BulkPipe, frame: &WireFrame) -> Result<(), TransportError> {
    let timeouts = TransferTimeouts::default();
    pipe.write(BULK_EP_OUT, &FRAME_HEADER, timeouts)?;
    pipe.write(BULK_EP_OUT, frame.as_bytes(), timeouts)
}

// ── Tests ────────────────────────────────────────────────────────
