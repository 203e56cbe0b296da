//! Display service core logic.
//!
//! Wires a [`DeviceSession`] (with its reconnect monitor) and a
//! [`Pipeline`] rendering the configured test pattern onto a simulated
//! bus, and runs them until cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use push_display_core::device::PushDevice;
use push_display_core::display::{ContentSignal, Pipeline, StatsSnapshot};
use push_display_core::error::PushError;
use push_display_core::session::DeviceSession;
use push_display_core::transport::SimulatedBus;

use crate::config::DisplayConfig;

/// How long a simulated unplug lasts before the device comes back.
const REPLUG_DELAY: Duration = Duration::from_secs(2);

// ── DisplayService ───────────────────────────────────────────────

/// The top-level display service.
pub struct DisplayService {
    config: DisplayConfig,
    bus: SimulatedBus,
    device: PushDevice,
    unplug_after: Option<Duration>,
    cancel: CancellationToken,
}

impl DisplayService {
    /// Create a service whose bus has `device` attached.
    pub fn new(config: DisplayConfig, device: PushDevice) -> Self {
        let bus = SimulatedBus::new();
        bus.plug(device);
        Self {
            config,
            bus,
            device,
            unplug_after: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Unplug the device after `delay` and plug it back shortly after.
    pub fn with_unplug_after(mut self, delay: Duration) -> Self {
        self.unplug_after = Some(delay);
        self
    }

    pub fn bus(&self) -> &SimulatedBus {
        &self.bus
    }

    /// Token that stops the service when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Run until stopped. Returns the final pipeline counters.
    pub async fn run(&self) -> Result<StatsSnapshot, PushError> {
        let pattern = self.config.to_pattern()?;
        let pipeline_config = self.config.to_pipeline_config();
        let animating_fps = pipeline_config.animating_fps;

        let session = Arc::new(DeviceSession::new(
            Arc::new(self.bus.clone()),
            self.config.to_session_config(),
        ));
        let monitor = session.spawn_monitor(self.cancel.child_token());

        let pipeline = Pipeline::with_cancel(
            Arc::clone(&session),
            pattern,
            pipeline_config,
            self.cancel.child_token(),
        );
        if self.config.display.animating {
            pipeline.set_animating(true);
            tokio::spawn(animate(
                pipeline.signal(),
                animating_fps,
                self.cancel.child_token(),
            ));
        }
        let supervisor = pipeline.start();

        if let Some(delay) = self.unplug_after {
            tokio::spawn(unplug_cycle(
                self.bus.clone(),
                self.device,
                delay,
                self.cancel.child_token(),
            ));
        }

        info!(device = %self.device, "display service running");
        self.cancel.cancelled().await;

        pipeline.stop();
        if let Err(e) = supervisor.await {
            warn!("pipeline task error: {e}");
        }
        if let Err(e) = monitor.await {
            warn!("monitor task error: {e}");
        }
        session.disconnect();

        let stats = pipeline.stats();
        info!(
            rendered = stats.rendered,
            delivered = stats.delivered,
            keep_alives = stats.keep_alives,
            send_failures = stats.send_failures,
            "display service stopped"
        );
        Ok(stats)
    }
}

// ── Internal ─────────────────────────────────────────────────────

/// Mark content dirty at the animation rate.
async fn animate(signal: ContentSignal, fps: u32, cancel: CancellationToken) {
    let mut ticker = time::interval(Duration::from_secs_f64(1.0 / fps.max(1) as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => signal.notify(),
        }
    }
}

async fn unplug_cycle(
    bus: SimulatedBus,
    device: PushDevice,
    delay: Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = time::sleep(delay) => {}
    }
    info!(device = %device, "simulating unplug");
    bus.unplug(device);

    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = time::sleep(REPLUG_DELAY) => {}
    }
    info!(device = %device, "simulating replug");
    bus.plug(device);
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_creates_with_defaults() {
        let svc = DisplayService::new(DisplayConfig::default(), PushDevice::Push2);
        assert!(svc.is_running());
        assert!(!svc.bus().is_seized(PushDevice::Push2));
        svc.stop();
        assert!(!svc.is_running());
    }

    #[tokio::test]
    async fn streams_until_stopped() {
        let svc = DisplayService::new(DisplayConfig::default(), PushDevice::Push3);
        let cancel = svc.cancel_token();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(400)).await;
            cancel.cancel();
        });

        let stats = svc.run().await.unwrap();
        assert!(stats.rendered >= 1);
        assert!(stats.delivered > 0);
        assert!(!svc.bus().is_seized(PushDevice::Push3));
    }

    #[tokio::test]
    async fn bad_pattern_fails_fast() {
        let mut config = DisplayConfig::default();
        config.demo.pattern = "plaid".into();
        let svc = DisplayService::new(config, PushDevice::Push2);
        assert!(matches!(svc.run().await, Err(PushError::Config(_))));
    }
}
