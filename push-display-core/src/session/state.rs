//! Device session lifecycle.
//!
//! [`SessionState`] models the three phases of a device link with
//! validated transitions that return `Result` instead of panicking.

use std::time::Duration;

use tokio::time::Instant;

use crate::device::PushDevice;
use crate::error::DeviceError;

// ── SessionState ─────────────────────────────────────────────────

/// The current phase of the device link.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲               │              │
///       └───────────────┴──────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No handle held. Initial state.
    #[default]
    Disconnected,

    /// A connection attempt is in flight.
    Connecting,

    /// The bulk-out pipe is open and owned by the session.
    Connected {
        device: PushDevice,
        /// When the session entered `Connected`.
        since: Instant,
    },
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { device, .. } => write!(f, "Connected({device})"),
        }
    }
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    /// The connected device, if any.
    pub fn device(&self) -> Option<PushDevice> {
        match self {
            Self::Connected { device, .. } => Some(*device),
            _ => None,
        }
    }

    /// How long the session has been connected.
    pub fn connected_duration(&self) -> Option<Duration> {
        match self {
            Self::Connected { since, .. } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// `Disconnected → Connecting`.
    pub fn begin_connect(&mut self) -> Result<(), DeviceError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            Self::Connecting => Err(DeviceError::InvalidState(
                "connection attempt already in flight",
            )),
            Self::Connected { .. } => Err(DeviceError::InvalidState("already connected")),
        }
    }

    /// `Connecting → Connected`.
    pub fn complete_connect(&mut self, device: PushDevice) -> Result<(), DeviceError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected {
                    device,
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(DeviceError::InvalidState(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// `Connecting → Disconnected` after a failed attempt.
    pub fn fail_connect(&mut self) -> Result<(), DeviceError> {
        match self {
            Self::Connecting => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(DeviceError::InvalidState(
                "cannot fail connect: not in Connecting state",
            )),
        }
    }

    /// `Connected → Disconnected`. Returns the device that was dropped.
    pub fn disconnect(&mut self) -> Result<PushDevice, DeviceError> {
        match *self {
            Self::Connected { device, .. } => {
                *self = Self::Disconnected;
                Ok(device)
            }
            _ => Err(DeviceError::InvalidState(
                "cannot disconnect: not in Connected state",
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut state = SessionState::default();
        assert!(state.is_disconnected());

        state.begin_connect().unwrap();
        assert!(state.is_connecting());

        state.complete_connect(PushDevice::Push2).unwrap();
        assert!(state.is_connected());
        assert_eq!(state.device(), Some(PushDevice::Push2));
        assert!(state.connected_duration().is_some());

        assert_eq!(state.disconnect().unwrap(), PushDevice::Push2);
        assert!(state.is_disconnected());
        assert_eq!(state.device(), None);
    }

    #[test]
    fn failed_attempt_returns_to_disconnected() {
        let mut state = SessionState::Connecting;
        state.fail_connect().unwrap();
        assert!(state.is_disconnected());
    }

    #[test]
    fn second_attempt_while_connecting_is_rejected() {
        let mut state = SessionState::Connecting;
        assert!(matches!(
            state.begin_connect(),
            Err(DeviceError::InvalidState(_))
        ));
    }

    #[test]
    fn connect_when_connected_is_rejected() {
        let mut state = SessionState::Connected {
            device: PushDevice::Push3,
            since: Instant::now(),
        };
        assert!(state.begin_connect().is_err());
        assert!(state.fail_connect().is_err());
    }

    #[test]
    fn complete_requires_connecting() {
        let mut state = SessionState::Disconnected;
        assert!(state.complete_connect(PushDevice::Push2).is_err());
        assert!(state.disconnect().is_err());
    }

    #[test]
    fn display_format() {
        assert_eq!(SessionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(SessionState::Connecting.to_string(), "Connecting");
        let state = SessionState::Connected {
            device: PushDevice::Push3Sa,
            since: Instant::now(),
        };
        assert_eq!(state.to_string(), "Connected(Push 3 SA)");
    }
}
