//! Background reconnect monitor.
//!
//! Combines a periodic timer with hotplug notifications. Every
//! notification is applied to the session immediately (a removal drops
//! the link) and (re)arms a single settle deadline, so a burst of events
//! yields one attempt. All attempts go through the session's reconnect
//! gate.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::DeviceSession;
use crate::device::VENDOR_ID;

impl DeviceSession {
    /// Spawn the reconnect monitor. Runs until `cancel` fires.
    pub fn spawn_monitor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let session = Arc::clone(self);
        let mut hotplug = self.transport.subscribe_hotplug(VENDOR_ID);

        tokio::spawn(async move {
            let mut ticker = time::interval(session.config.reconnect_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let settle = time::sleep(session.config.settle_delay);
            tokio::pin!(settle);
            let mut settle_armed = false;
            let mut hotplug_open = true;

            debug!(
                interval_ms = session.config.reconnect_interval.as_millis() as u64,
                "reconnect monitor started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,

                    _ = ticker.tick() => {
                        reconnect(&session, "timer").await;
                    }

                    event = hotplug.recv(), if hotplug_open => match event {
                        Some(event) => {
                            debug!(?event, "hotplug");
                            session.handle_hotplug(event);
                            settle
                                .as_mut()
                                .reset(Instant::now() + session.config.settle_delay);
                            settle_armed = true;
                        }
                        None => {
                            warn!("hotplug notifications closed, relying on the timer");
                            hotplug_open = false;
                        }
                    },

                    _ = &mut settle, if settle_armed => {
                        settle_armed = false;
                        reconnect(&session, "hotplug").await;
                    }
                }
            }

            debug!("reconnect monitor stopped");
        })
    }
}

async fn reconnect(session: &Arc<DeviceSession>, trigger: &'static str) {
    if !session.reconnect_due_at(Instant::now()) {
        return;
    }
    let s = Arc::clone(session);
    match tokio::task::spawn_blocking(move || s.connect(None)).await {
        Ok(Ok(device)) => info!(device = %device, trigger, "reconnected"),
        Ok(Err(e)) => debug!(error = %e, trigger, "reconnect attempt failed"),
        Err(e) => warn!(error = %e, "reconnect task panicked"),
    }
}
