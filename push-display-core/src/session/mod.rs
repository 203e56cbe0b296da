//! Device session: discovery, exclusive connect, frame transfer and
//! disconnect handling for a single Push display.
//!
//! The session owns at most one open [`BulkPipe`]. Any transfer failure
//! or removal notification drops it and moves to
//! [`SessionState::Disconnected`]; the reconnect monitor
//! ([`DeviceSession::spawn_monitor`]) brings the link back.
//!
//! Lock order is pipe slot → state. The state lives in a
//! `watch::Sender` so observers (the pipeline) see every transition.

mod monitor;
pub mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::device::{PushDevice, VENDOR_ID};
use crate::display::encoder::WireFrame;
use crate::error::{DeviceError, TransportError};
use crate::transport::{self, BulkPipe, HotplugEvent, Transport};

pub use state::SessionState;

// ── SessionConfig ────────────────────────────────────────────────

/// Reconnect and device-selection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Device to pick when several are attached.
    pub preferred: Option<PushDevice>,
    /// Period of the reconnect timer.
    pub reconnect_interval: Duration,
    /// No automatic attempt within this long after a disconnect.
    pub debounce: Duration,
    /// Wait after a hotplug notification before attempting to connect.
    pub settle_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preferred: None,
            reconnect_interval: Duration::from_secs(1),
            debounce: Duration::from_secs(1),
            settle_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Default)]
struct ReconnectGate {
    last_disconnect: Option<Instant>,
    last_attempt: Option<Instant>,
}

// ── DeviceSession ────────────────────────────────────────────────

/// Owns the transport handle for one display.
///
/// All methods except [`spawn_monitor`](Self::spawn_monitor) and
/// [`subscribe`](Self::subscribe) may block on the transport and belong
/// on the blocking pool.
pub struct DeviceSession {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    pipe: Mutex<Option<Box<dyn BulkPipe>>>,
    gate: Mutex<ReconnectGate>,
    attempts: AtomicU64,
}

impl DeviceSession {
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            transport,
            config,
            state,
            pipe: Mutex::new(None),
            gate: Mutex::new(ReconnectGate::default()),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    pub fn connected_device(&self) -> Option<PushDevice> {
        self.state.borrow().device()
    }

    /// Number of connection attempts made so far.
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    // ── Discovery / connect ──────────────────────────────────────

    /// Supported devices currently attached, in catalogue order.
    pub fn discover(&self) -> Vec<PushDevice> {
        PushDevice::ALL
            .into_iter()
            .filter(|d| !self.transport.discover(VENDOR_ID, d.product_id()).is_empty())
            .collect()
    }

    /// Open an exclusive handle on `device`, or on the preferred / first
    /// discovered device when `None`.
    pub fn connect(&self, device: Option<PushDevice>) -> Result<PushDevice, DeviceError> {
        self.transition(SessionState::begin_connect)?;
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.gate().last_attempt = Some(Instant::now());

        // Waits for any in-flight transfer on a handle from an earlier
        // link, so two handles are never live at once.
        let mut slot = self.pipe_slot();
        if let Some(mut stale) = slot.take() {
            stale.close();
        }

        match self.open_device(device) {
            Ok((device, pipe)) => {
                *slot = Some(pipe);
                if let Err(e) = self.transition(|s| s.complete_connect(device)) {
                    if let Some(mut pipe) = slot.take() {
                        pipe.close();
                    }
                    return Err(e);
                }
                info!(device = %device, product_id = device.product_id(), "device connected");
                Ok(device)
            }
            Err(e) => {
                let _ = self.transition(SessionState::fail_connect);
                debug!(error = %e, "connect failed");
                Err(e)
            }
        }
    }

    fn open_device(
        &self,
        requested: Option<PushDevice>,
    ) -> Result<(PushDevice, Box<dyn BulkPipe>), DeviceError> {
        let device = match requested {
            Some(d) => d,
            None => self.pick_device().ok_or(DeviceError::NotFound)?,
        };
        let bus_device = self
            .transport
            .discover(VENDOR_ID, device.product_id())
            .into_iter()
            .next()
            .ok_or(DeviceError::NotFound)?;
        let pipe = self
            .transport
            .open(&bus_device, true)
            .map_err(TransportError::into_open_error)?;
        Ok((device, pipe))
    }

    fn pick_device(&self) -> Option<PushDevice> {
        let present = self.discover();
        match self.config.preferred {
            Some(p) if present.contains(&p) => Some(p),
            _ => present.first().copied(),
        }
    }

    // ── Transfer ─────────────────────────────────────────────────

    /// Send one frame: header then payload, each bounded by the transfer
    /// timeout.
    ///
    /// Returns [`DeviceError::NotConnected`] without touching the
    /// transport when disconnected. Any transfer failure drops the link
    /// before the error is returned.
    pub fn send(&self, frame: &WireFrame) -> Result<(), DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }

        let mut slot = self.pipe_slot();
        // The link may have been dropped while we waited for the slot.
        if !self.is_connected() {
            if let Some(mut pipe) = slot.take() {
                pipe.close();
            }
            return Err(DeviceError::NotConnected);
        }
        let Some(pipe) = slot.as_mut() else {
            return Err(DeviceError::NotConnected);
        };

        let result = transport::write_frame(pipe.as_mut(), frame);

        match result {
            Ok(()) => {
                if !self.is_connected() {
                    // Removed mid-transfer; release the handle now.
                    if let Some(mut pipe) = slot.take() {
                        pipe.close();
                    }
                }
                Ok(())
            }
            Err(e) => {
                let err = e.into_transfer_error();
                if let Some(mut pipe) = slot.take() {
                    pipe.close();
                }
                warn!(error = %err, "frame transfer failed");
                // Still holding the slot, so no newer link can exist yet.
                // If the link was already dropped, leave the state alone.
                self.drop_link("transfer failed");
                drop(slot);
                Err(err)
            }
        }
    }

    // ── Disconnect ───────────────────────────────────────────────

    /// Release the device. Returns the device that was connected.
    pub fn disconnect(&self) -> Option<PushDevice> {
        self.drop_link("requested")
    }

    /// Apply a bus notification. A removal of the connected model drops
    /// the link immediately.
    pub fn handle_hotplug(&self, event: HotplugEvent) {
        match event {
            HotplugEvent::Removed(dev) => {
                if self.connected_device().map(PushDevice::product_id) == Some(dev.product_id) {
                    self.drop_link("device removed");
                }
            }
            HotplugEvent::Arrived(dev) => {
                debug!(product_id = dev.product_id, "device arrived");
            }
        }
    }

    fn drop_link(&self, reason: &'static str) -> Option<PushDevice> {
        let device = self.transition(SessionState::disconnect).ok()?;
        self.gate().last_disconnect = Some(Instant::now());

        // A transfer in flight holds the slot; it releases the handle
        // itself once it sees the state change.
        let slot = match self.pipe.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        };
        if let Some(mut slot) = slot {
            if let Some(mut pipe) = slot.take() {
                pipe.close();
            }
        }

        info!(device = %device, reason, "device disconnected");
        Some(device)
    }

    // ── Reconnect policy ─────────────────────────────────────────

    /// Whether an automatic attempt is allowed at `now`: disconnected,
    /// nothing in flight, no disconnect within the debounce window, and
    /// no attempt within half a timer period.
    pub fn reconnect_due_at(&self, now: Instant) -> bool {
        if !self.state.borrow().is_disconnected() {
            return false;
        }
        let gate = self.gate();
        let recent = |t: Option<Instant>, window: Duration| {
            t.is_some_and(|t| now.saturating_duration_since(t) < window)
        };
        !recent(gate.last_disconnect, self.config.debounce)
            && !recent(gate.last_attempt, self.config.reconnect_interval / 2)
    }

    /// Attempt a connection if the policy allows one now.
    pub fn try_reconnect(&self) -> Option<Result<PushDevice, DeviceError>> {
        if !self.reconnect_due_at(Instant::now()) {
            return None;
        }
        Some(self.connect(None))
    }

    // ── Internal ─────────────────────────────────────────────────

    fn transition<T>(
        &self,
        f: impl FnOnce(&mut SessionState) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut out = Err(DeviceError::InvalidState("transition not applied"));
        self.state.send_if_modified(|s| {
            out = f(s);
            out.is_ok()
        });
        out
    }

    fn pipe_slot(&self) -> MutexGuard<'_, Option<Box<dyn BulkPipe>>> {
        self.pipe.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self) -> MutexGuard<'_, ReconnectGate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(mut pipe) = self.pipe_slot().take() {
            pipe.close();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sim::{SimFault, SimulatedBus};
    use tokio_test::{assert_err, assert_ok};

    use std::sync::mpsc as std_mpsc;
    use std::thread;

    use crate::error::TransportError;
    use crate::transport::{BusDevice, FRAME_HEADER_LEN, TransferTimeouts};

    /// Pipe whose payload write parks until released, then fails.
    struct GatedPipe {
        inner: Box<dyn BulkPipe>,
        entered: std_mpsc::Sender<()>,
        release: std_mpsc::Receiver<()>,
    }

    impl BulkPipe for GatedPipe {
        fn write(
            &mut self,
            pipe: u8,
            bytes: &[u8],
            timeouts: TransferTimeouts,
        ) -> Result<(), TransportError> {
            if bytes.len() <= FRAME_HEADER_LEN {
                return self.inner.write(pipe, bytes, timeouts);
            }
            let _ = self.entered.send(());
            let _ = self.release.recv();
            Err(TransportError::Disconnected)
        }

        fn close(&mut self) {
            self.inner.close();
        }
    }

    /// Hands out one gated pipe, then plain simulated pipes.
    struct GatedTransport {
        bus: SimulatedBus,
        gate: Mutex<Option<(std_mpsc::Sender<()>, std_mpsc::Receiver<()>)>>,
    }

    impl Transport for GatedTransport {
        fn discover(&self, vendor_id: u16, product_id: u16) -> Vec<BusDevice> {
            self.bus.discover(vendor_id, product_id)
        }

        fn open(
            &self,
            device: &BusDevice,
            exclusive: bool,
        ) -> Result<Box<dyn BulkPipe>, TransportError> {
            let inner = self.bus.open(device, exclusive)?;
            match self.gate.lock().unwrap().take() {
                Some((entered, release)) => Ok(Box::new(GatedPipe {
                    inner,
                    entered,
                    release,
                })),
                None => Ok(inner),
            }
        }

        fn subscribe_hotplug(
            &self,
            vendor_id: u16,
        ) -> tokio::sync::mpsc::UnboundedReceiver<HotplugEvent> {
            self.bus.subscribe_hotplug(vendor_id)
        }
    }

    #[test]
    fn stale_transfer_failure_keeps_newer_link() {
        let bus = SimulatedBus::new();
        let dev = bus.plug(PushDevice::Push2);
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let transport = GatedTransport {
            bus: bus.clone(),
            gate: Mutex::new(Some((entered_tx, release_rx))),
        };
        let session = Arc::new(DeviceSession::new(
            Arc::new(transport),
            SessionConfig::default(),
        ));
        assert_ok!(session.connect(None));

        let sender = {
            let s = Arc::clone(&session);
            thread::spawn(move || s.send(&WireFrame::black()))
        };
        entered_rx.recv().unwrap();

        // Removal lands while the payload write is parked.
        session.handle_hotplug(HotplugEvent::Removed(dev));
        assert!(session.state().is_disconnected());

        let reconnect = {
            let s = Arc::clone(&session);
            thread::spawn(move || s.connect(Some(PushDevice::Push2)))
        };
        while !session.state().is_connecting() {
            thread::sleep(Duration::from_millis(1));
        }

        release_tx.send(()).unwrap();
        assert!(matches!(
            sender.join().unwrap(),
            Err(DeviceError::TransferFailed(_))
        ));
        assert_eq!(reconnect.join().unwrap(), Ok(PushDevice::Push2));

        assert_eq!(session.connected_device(), Some(PushDevice::Push2));
        assert!(bus.is_seized(PushDevice::Push2));
        assert_ok!(session.send(&WireFrame::black()));
    }

    fn session_on(bus: &SimulatedBus) -> DeviceSession {
        DeviceSession::new(Arc::new(bus.clone()), SessionConfig::default())
    }

    #[test]
    fn discover_reports_attached_models() {
        let bus = SimulatedBus::new();
        let session = session_on(&bus);
        assert!(session.discover().is_empty());

        bus.plug(PushDevice::Push3Sa);
        bus.plug(PushDevice::Push2);
        assert_eq!(
            session.discover(),
            vec![PushDevice::Push2, PushDevice::Push3Sa]
        );
    }

    #[test]
    fn connect_without_device_is_not_found() {
        let bus = SimulatedBus::new();
        let session = session_on(&bus);
        assert_eq!(session.connect(None), Err(DeviceError::NotFound));
        assert!(session.state().is_disconnected());
    }

    #[test]
    fn connect_picks_first_discovered_and_seizes() {
        let bus = SimulatedBus::new();
        bus.plug(PushDevice::Push3);
        bus.plug(PushDevice::Push2);
        let session = session_on(&bus);

        assert_eq!(session.connect(None), Ok(PushDevice::Push2));
        assert!(session.is_connected());
        assert!(bus.is_seized(PushDevice::Push2));
        assert!(!bus.is_seized(PushDevice::Push3));
    }

    #[test]
    fn preferred_device_wins_when_present() {
        let bus = SimulatedBus::new();
        bus.plug(PushDevice::Push2);
        bus.plug(PushDevice::Push3Sa);
        let config = SessionConfig {
            preferred: Some(PushDevice::Push3Sa),
            ..Default::default()
        };
        let session = DeviceSession::new(Arc::new(bus.clone()), config);
        assert_eq!(session.connect(None), Ok(PushDevice::Push3Sa));
    }

    #[test]
    fn open_failure_returns_to_disconnected() {
        let bus = SimulatedBus::new();
        bus.plug(PushDevice::Push2);
        bus.fail_next_opens(1);
        let session = session_on(&bus);

        assert!(matches!(
            session.connect(Some(PushDevice::Push2)),
            Err(DeviceError::OpenFailed(_))
        ));
        assert!(session.state().is_disconnected());
        assert_ok!(session.connect(Some(PushDevice::Push2)));
    }

    #[test]
    fn connect_twice_is_rejected() {
        let bus = SimulatedBus::new();
        bus.plug(PushDevice::Push2);
        let session = session_on(&bus);
        assert_ok!(session.connect(None));
        assert!(matches!(
            session.connect(None),
            Err(DeviceError::InvalidState(_))
        ));
        assert!(session.is_connected());
    }

    #[test]
    fn send_while_disconnected_is_a_noop() {
        let bus = SimulatedBus::new();
        bus.plug(PushDevice::Push2);
        let session = session_on(&bus);

        assert_eq!(
            session.send(&WireFrame::black()),
            Err(DeviceError::NotConnected)
        );
        assert_eq!(bus.write_count(), 0);
    }

    #[test]
    fn send_writes_header_then_frame() {
        let bus = SimulatedBus::new();
        bus.plug(PushDevice::Push2);
        let session = session_on(&bus);
        assert_ok!(session.connect(None));

        let frame = WireFrame::solid(255, 0, 0);
        assert_ok!(session.send(&frame));

        let writes = bus.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].len, 16);
        assert_eq!(writes[1].len, 327_680);
        assert!(writes.iter().all(|w| w.pipe == 0x01));
        assert_eq!(bus.last_payload(), frame.as_bytes());
    }

    #[test]
    fn send_failure_disconnects_and_clears_device() {
        let bus = SimulatedBus::new();
        bus.plug(PushDevice::Push2);
        let session = session_on(&bus);
        assert_ok!(session.connect(None));

        bus.inject_write_fault(SimFault::Stall);
        assert!(matches!(
            session.send(&WireFrame::black()),
            Err(DeviceError::TransferFailed(_))
        ));
        assert!(session.state().is_disconnected());
        assert_eq!(session.connected_device(), None);
        assert!(!bus.is_seized(PushDevice::Push2));
    }

    #[test]
    fn removal_of_connected_model_disconnects() {
        let bus = SimulatedBus::new();
        let dev = bus.plug(PushDevice::Push2);
        let session = session_on(&bus);
        assert_ok!(session.connect(None));

        let mut other = dev;
        other.product_id = PushDevice::Push3.product_id();
        session.handle_hotplug(HotplugEvent::Removed(other));
        assert!(session.is_connected());

        session.handle_hotplug(HotplugEvent::Removed(dev));
        assert!(session.state().is_disconnected());
    }

    #[test]
    fn explicit_disconnect_releases_handle() {
        let bus = SimulatedBus::new();
        bus.plug(PushDevice::Push3);
        let session = session_on(&bus);
        assert_ok!(session.connect(None));

        assert_eq!(session.disconnect(), Some(PushDevice::Push3));
        assert!(!bus.is_seized(PushDevice::Push3));
        assert_eq!(session.disconnect(), None);
    }

    #[test]
    fn debounce_blocks_attempts_after_disconnect() {
        let bus = SimulatedBus::new();
        bus.plug(PushDevice::Push2);
        let session = session_on(&bus);
        assert_ok!(session.connect(None));
        session.disconnect();

        let t0 = Instant::now();
        assert!(!session.reconnect_due_at(t0));
        assert!(!session.reconnect_due_at(t0 + Duration::from_millis(500)));
        assert!(session.reconnect_due_at(t0 + Duration::from_millis(1100)));
    }

    #[test]
    fn repeated_removal_notice_while_disconnected_is_ignored() {
        let bus = SimulatedBus::new();
        let dev = bus.plug(PushDevice::Push2);
        let session = session_on(&bus);
        assert_ok!(session.connect(None));
        let before = session.connect_attempts();

        // The second notice finds nothing connected and leaves the gate
        // as the first removal set it.
        session.handle_hotplug(HotplugEvent::Removed(dev));
        assert!(session.try_reconnect().is_none());
        session.handle_hotplug(HotplugEvent::Removed(dev));
        assert!(session.try_reconnect().is_none());
        assert_eq!(session.connect_attempts(), before);

        let later = Instant::now() + Duration::from_millis(1100);
        assert!(session.reconnect_due_at(later));
    }

    #[test]
    fn no_attempt_while_connected() {
        let bus = SimulatedBus::new();
        bus.plug(PushDevice::Push2);
        let session = session_on(&bus);
        assert_ok!(session.connect(None));
        assert!(!session.reconnect_due_at(Instant::now() + Duration::from_secs(10)));
        assert_err!(session.connect(None));
    }

    #[test]
    fn observers_see_transitions() {
        let bus = SimulatedBus::new();
        bus.plug(PushDevice::Push2);
        let session = session_on(&bus);
        let mut rx = session.subscribe();

        assert_ok!(session.connect(None));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_connected());

        session.disconnect();
        assert!(rx.borrow_and_update().is_disconnected());
    }
}
