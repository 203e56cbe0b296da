//! In-process bus used by tests and the demo service.
//!
//! [`SimulatedBus`] implements [`Transport`] with hot-pluggable devices,
//! exclusive seize semantics, injectable faults and a log of every
//! bulk write. Clones share the same bus.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::device::PushDevice;
use crate::error::TransportError;
use crate::transport::{BulkPipe, BusDevice, HotplugEvent, TransferTimeouts, Transport};

/// A fault to inject into the next bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// The write waits for its completion timeout, then fails.
    Timeout,
    /// The pipe stalls immediately.
    Stall,
}

/// One bulk write seen by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub device: BusDevice,
    pub pipe: u8,
    pub len: usize,
    pub timeouts: TransferTimeouts,
}

#[derive(Default)]
struct BusState {
    /// Attached devices, each tagged with a unique attach epoch.
    attached: Vec<(BusDevice, u64)>,
    next_epoch: u64,
    seized: HashSet<u32>,
    subscribers: Vec<(u16, mpsc::UnboundedSender<HotplugEvent>)>,
    write_faults: VecDeque<SimFault>,
    open_faults: u32,
    open_attempts: u64,
    writes: Vec<WriteRecord>,
    last_payload: Vec<u8>,
    write_latency: Duration,
}

impl BusState {
    fn notify(&mut self, event: HotplugEvent) {
        let vendor = event.device().vendor_id;
        self.subscribers
            .retain(|(v, tx)| *v != vendor || tx.send(event).is_ok());
    }

    fn epoch_of(&self, location: u32) -> Option<u64> {
        self.attached
            .iter()
            .find(|(d, _)| d.location == location)
            .map(|(_, e)| *e)
    }
}

// ── SimulatedBus ─────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<BusState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        lock(&self.state)
    }

    /// Attach a device and announce it to hotplug subscribers.
    pub fn plug(&self, device: PushDevice) -> BusDevice {
        let mut st = self.state();
        st.next_epoch += 1;
        let epoch = st.next_epoch;
        let bus_device = BusDevice {
            vendor_id: device.vendor_id(),
            product_id: device.product_id(),
            location: epoch as u32,
        };
        st.attached.push((bus_device, epoch));
        st.notify(HotplugEvent::Arrived(bus_device));
        debug!(device = %device, location = bus_device.location, "sim: plugged");
        bus_device
    }

    /// Detach the first attached instance of `device`. Open pipes on it
    /// fail from now on. Returns `false` if none was attached.
    pub fn unplug(&self, device: PushDevice) -> bool {
        let mut st = self.state();
        let Some(idx) = st
            .attached
            .iter()
            .position(|(d, _)| d.product_id == device.product_id())
        else {
            return false;
        };
        let (bus_device, _) = st.attached.remove(idx);
        st.seized.remove(&bus_device.location);
        st.notify(HotplugEvent::Removed(bus_device));
        debug!(device = %device, location = bus_device.location, "sim: unplugged");
        true
    }

    /// Fail the next bulk write with `fault`. Faults queue up.
    pub fn inject_write_fault(&self, fault: SimFault) {
        self.state().write_faults.push_back(fault);
    }

    /// Make the next `count` open attempts fail as busy.
    pub fn fail_next_opens(&self, count: u32) {
        self.state().open_faults += count;
    }

    /// Simulated time each bulk write takes.
    pub fn set_write_latency(&self, latency: Duration) {
        self.state().write_latency = latency;
    }

    pub fn open_attempts(&self) -> u64 {
        self.state().open_attempts
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state().writes.len()
    }

    /// Bytes of the most recent successful write.
    pub fn last_payload(&self) -> Vec<u8> {
        self.state().last_payload.clone()
    }

    /// Whether an exclusive handle is held on an instance of `device`.
    pub fn is_seized(&self, device: PushDevice) -> bool {
        let st = self.state();
        st.attached
            .iter()
            .any(|(d, _)| d.product_id == device.product_id() && st.seized.contains(&d.location))
    }
}

impl Transport for SimulatedBus {
    fn discover(&self, vendor_id: u16, product_id: u16) -> Vec<BusDevice> {
        self.state()
            .attached
            .iter()
            .map(|(d, _)| *d)
            .filter(|d| d.vendor_id == vendor_id && d.product_id == product_id)
            .collect()
    }

    fn open(
        &self,
        device: &BusDevice,
        exclusive: bool,
    ) -> Result<Box<dyn BulkPipe>, TransportError> {
        let mut st = self.state();
        st.open_attempts += 1;
        if st.open_faults > 0 {
            st.open_faults -= 1;
            return Err(TransportError::Busy);
        }
        let epoch = st
            .epoch_of(device.location)
            .ok_or(TransportError::NoDevice)?;
        if st.seized.contains(&device.location) {
            return Err(TransportError::Busy);
        }
        if exclusive {
            st.seized.insert(device.location);
        }
        Ok(Box::new(SimPipe {
            state: Arc::clone(&self.state),
            device: *device,
            epoch,
            exclusive,
            open: true,
        }))
    }

    fn subscribe_hotplug(&self, vendor_id: u16) -> mpsc::UnboundedReceiver<HotplugEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().subscribers.push((vendor_id, tx));
        rx
    }
}

// ── SimPipe ──────────────────────────────────────────────────────

struct SimPipe {
    state: Arc<Mutex<BusState>>,
    device: BusDevice,
    epoch: u64,
    exclusive: bool,
    open: bool,
}

impl SimPipe {
    fn attached(&self, st: &BusState) -> bool {
        st.epoch_of(self.device.location) == Some(self.epoch)
    }
}

impl BulkPipe for SimPipe {
    fn write(
        &mut self,
        pipe: u8,
        bytes: &[u8],
        timeouts: TransferTimeouts,
    ) -> Result<(), TransportError> {
        let (fault, latency) = {
            let mut st = lock(&self.state);
            if !self.open || !self.attached(&st) {
                return Err(TransportError::Disconnected);
            }
            (st.write_faults.pop_front(), st.write_latency)
        };

        match fault {
            Some(SimFault::Stall) => return Err(TransportError::Pipe("endpoint stalled".into())),
            Some(SimFault::Timeout) => {
                std::thread::sleep(timeouts.completion);
                return Err(TransportError::Timeout);
            }
            None => {}
        }

        if latency > timeouts.completion {
            std::thread::sleep(timeouts.completion);
            return Err(TransportError::Timeout);
        }
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let mut st = lock(&self.state);
        if !self.attached(&st) {
            return Err(TransportError::Disconnected);
        }
        st.writes.push(WriteRecord {
            device: self.device,
            pipe,
            len: bytes.len(),
            timeouts,
        });
        st.last_payload.clear();
        st.last_payload.extend_from_slice(bytes);
        trace!(len = bytes.len(), pipe, "sim: bulk write");
        Ok(())
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if self.exclusive {
            let mut st = lock(&self.state);
            if self.attached(&st) {
                st.seized.remove(&self.device.location);
            }
        }
    }
}

impl Drop for SimPipe {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ────────────────────────────────────────────────────────
