//! Domain-specific error types for the Push display stack.
//!
//! Fallible operations return `Result<T, PushError>` or one of the
//! narrower enums below. None of them is fatal: device errors are
//! absorbed into the `Disconnected` session state and retried by the
//! reconnect policy.

use thiserror::Error;

/// The canonical error type for this crate.
#[derive(Debug, Error)]
pub enum PushError {
    /// The renderer produced a bitmap the transcoder cannot read.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A session-level device failure.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The bus transport reported a failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The renderer failed to produce a bitmap.
    #[error("render failed: {0}")]
    Render(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A channel or watch sender was dropped unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── EncodingError ────────────────────────────────────────────────

/// The input bitmap violates the fixed 960×160 contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// Bitmap is too small, has a short stride, or a truncated buffer.
    #[error("invalid dimensions: {width}x{height} stride {stride} ({len} bytes)")]
    InvalidDimensions {
        width: u32,
        height: u32,
        stride: u32,
        len: usize,
    },
}

// ── DeviceError ──────────────────────────────────────────────────

/// Failures observed by [`DeviceSession`](crate::session::DeviceSession).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// No supported device is present on the bus.
    #[error("no supported device found")]
    NotFound,

    /// The device was found but could not be opened exclusively.
    #[error("failed to open device: {0}")]
    OpenFailed(String),

    /// A bulk transfer did not complete within its timeout.
    #[error("transfer timed out")]
    TransferTimeout,

    /// A bulk transfer failed for any other reason.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// `send` was called while no device is connected.
    #[error("not connected")]
    NotConnected,

    /// The requested transition is not valid from the current state.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),
}

// ── TransportError ───────────────────────────────────────────────

/// Errors reported by a [`Transport`](crate::transport::Transport)
/// implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing matching the vendor / product pair is attached.
    #[error("no such device")]
    NoDevice,

    /// Another process holds the device.
    #[error("device busy")]
    Busy,

    /// The write hit its no-data or completion timeout.
    #[error("timed out")]
    Timeout,

    /// The pipe stalled or rejected the transfer.
    #[error("pipe error: {0}")]
    Pipe(String),

    /// The device went away while the handle was open.
    #[error("device disconnected")]
    Disconnected,

    /// Underlying OS error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Map an open failure onto the session taxonomy.
    pub fn into_open_error(self) -> DeviceError {
        match self {
            TransportError::NoDevice => DeviceError::NotFound,
            other => DeviceError::OpenFailed(other.to_string()),
        }
    }

    /// Map a write failure onto the session taxonomy.
    pub fn into_transfer_error(self) -> DeviceError {
        match self {
            TransportError::Timeout => DeviceError::TransferTimeout,
            other => DeviceError::TransferFailed(other.to_string()),
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for PushError {
    fn from(s: String) -> Self {
        PushError::Other(s)
    }
}

impl From<&str> for PushError {
    fn from(s: &str) -> Self {
        PushError::Other(s.to_string())
    }
}

impl From<tokio::task::JoinError> for PushError {
    fn from(e: tokio::task::JoinError) -> Self {
        PushError::Other(format!("worker task failed: {e}"))
    }
}

impl<T> From<tokio::sync::watch::error::SendError<T>> for PushError {
    fn from(_: tokio::sync::watch::error::SendError<T>) -> Self {
        PushError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = EncodingError::InvalidDimensions {
            width: 320,
            height: 160,
            stride: 1280,
            len: 204_800,
        };
        assert!(e.to_string().contains("320x160"));

        let e = PushError::from(DeviceError::OpenFailed("seize denied".into()));
        assert!(e.to_string().contains("seize denied"));
    }

    #[test]
    fn from_string() {
        let e: PushError = "something broke".into();
        assert!(matches!(e, PushError::Other(_)));
    }

    #[test]
    fn transport_errors_map_to_session_taxonomy() {
        assert_eq!(TransportError::NoDevice.into_open_error(), DeviceError::NotFound);
        assert!(matches!(
            TransportError::Busy.into_open_error(),
            DeviceError::OpenFailed(_)
        ));
        assert_eq!(
            TransportError::Timeout.into_transfer_error(),
            DeviceError::TransferTimeout
        );
        assert!(matches!(
            TransportError::Disconnected.into_transfer_error(),
            DeviceError::TransferFailed(_)
        ));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: TransportError = io_err.into();
        assert!(matches!(e, TransportError::Io(_)));
    }
}
