//! Frame pipeline.
//!
//! Two independently paced loops, running only while the session is
//! connected:
//!
//! 1. **Render**: when the [`ContentSignal`] is dirty and the minimum
//!    inter-render interval has passed, calls the [`Renderer`], encodes
//!    the bitmap and publishes it to the [`FrameBuffer`].
//! 2. **Delivery**: sends the latest published frame, or a black
//!    keep-alive when nothing has been published yet.
//!
//! A supervisor task watches the session state and starts a fresh pair
//! of loops (under a child [`CancellationToken`]) each time the session
//! enters `Connected`, cancelling them when it leaves. Render and encode
//! run on the blocking pool, as do transfers; cancellation never waits
//! for either.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::display::encoder::{self, WireFrame};
use crate::display::frame_buffer::FrameBuffer;
use crate::display::stats::{PipelineStats, StatsSnapshot, ThroughputMeter};
use crate::display::types::{Bitmap, DISPLAY_HEIGHT, DISPLAY_WIDTH};
use crate::error::{DeviceError, PushError};
use crate::session::{DeviceSession, SessionState};
use crate::transport::FRAME_HEADER_LEN;

// ── Renderer ─────────────────────────────────────────────────────

/// Produces display content. Called from the blocking pool.
pub trait Renderer: Send + 'static {
    fn render(&mut self, width: u32, height: u32) -> Result<Bitmap, PushError>;
}

impl<F> Renderer for F
where
    F: FnMut(u32, u32) -> Result<Bitmap, PushError> + Send + 'static,
{
    fn render(&mut self, width: u32, height: u32) -> Result<Bitmap, PushError> {
        self(width, height)
    }
}

// ── ContentSignal ────────────────────────────────────────────────

/// Cloneable "content changed" flag. Starts dirty so the first frame is
/// rendered as soon as the device connects.
#[derive(Debug, Clone)]
pub struct ContentSignal(Arc<AtomicBool>);

impl ContentSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Request a re-render.
    pub fn notify(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl Default for ContentSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ── PipelineConfig ───────────────────────────────────────────────

/// Loop cadences.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Render rate until [`Pipeline::set_animating`] is first called.
    pub render_fps: u32,
    pub animating_fps: u32,
    pub idle_fps: u32,
    /// Delivery rate.
    pub display_fps: u32,
    /// Renders closer together than this are skipped.
    pub min_render_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            render_fps: 30,
            animating_fps: 60,
            idle_fps: 10,
            display_fps: 30,
            min_render_interval: Duration::from_secs_f64(1.0 / 60.0),
        }
    }
}

fn period(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps.max(1) as f64)
}

fn ticker(period: Duration) -> Interval {
    let mut t = time::interval(period);
    t.set_missed_tick_behavior(MissedTickBehavior::Skip);
    t
}

// ── Pipeline ─────────────────────────────────────────────────────

struct Shared {
    session: Arc<DeviceSession>,
    renderer: Mutex<Box<dyn Renderer>>,
    frames: Arc<FrameBuffer>,
    signal: ContentSignal,
    stats: Arc<PipelineStats>,
    config: PipelineConfig,
    render_period: watch::Sender<Duration>,
    keep_alive: WireFrame,
}

impl Shared {
    /// Render, encode and publish one frame.
    fn render_once(&self) -> Result<(), PushError> {
        let bitmap = {
            let mut renderer = self
                .renderer
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            renderer.render(DISPLAY_WIDTH, DISPLAY_HEIGHT)?
        };
        let frame = encoder::encode(&bitmap)?;
        self.frames.publish(frame);
        Ok(())
    }

    /// One render pass with its outcome counted. Runs to completion on
    /// the blocking pool even if the loop is cancelled meanwhile.
    fn render_and_record(&self) {
        match self.render_once() {
            Ok(()) => {
                self.stats.record_render();
                trace!(generation = self.frames.generation(), "frame published");
            }
            Err(e) => {
                self.stats.record_render_failure();
                warn!(error = %e, "render failed");
            }
        }
    }

    /// One transfer with its outcome counted. A failure changes the
    /// session state before returning, which can cancel the loop that
    /// spawned us, so counting cannot wait for the loop.
    fn deliver(&self, frame: &WireFrame, keep_alive: bool) -> Result<(), DeviceError> {
        let result = self.session.send(frame);
        match &result {
            Ok(()) => self.stats.record_delivery(keep_alive),
            // Left Connected between tick and send; the supervisor stops us.
            Err(DeviceError::NotConnected) => {}
            Err(e) => {
                self.stats.record_send_failure();
                debug!(error = %e, "delivery failed");
            }
        }
        result
    }
}

/// Drives rendering and delivery for one [`DeviceSession`].
///
/// # Lifetime
///
/// [`start`](Self::start) spawns the supervisor; it runs until
/// [`stop`](Self::stop) is called. Dropping the pipeline does not stop
/// it.
pub struct Pipeline {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        session: Arc<DeviceSession>,
        renderer: impl Renderer,
        config: PipelineConfig,
    ) -> Self {
        Self::with_cancel(session, renderer, config, CancellationToken::new())
    }

    /// Use `cancel` (typically a child of the service token) for shutdown.
    pub fn with_cancel(
        session: Arc<DeviceSession>,
        renderer: impl Renderer,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (render_period, _) = watch::channel(period(config.render_fps));
        Self {
            shared: Arc::new(Shared {
                session,
                renderer: Mutex::new(Box::new(renderer)),
                frames: Arc::new(FrameBuffer::new()),
                signal: ContentSignal::new(),
                stats: Arc::new(PipelineStats::default()),
                config,
                render_period,
                keep_alive: WireFrame::black(),
            }),
            cancel,
        }
    }

    /// Handle for "content changed" notifications.
    pub fn signal(&self) -> ContentSignal {
        self.shared.signal.clone()
    }

    pub fn frames(&self) -> Arc<FrameBuffer> {
        Arc::clone(&self.shared.frames)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.shared.session
    }

    /// Switch the render cadence between the animating and idle rates.
    /// Takes effect on running loops immediately.
    pub fn set_animating(&self, animating: bool) {
        let fps = if animating {
            self.shared.config.animating_fps
        } else {
            self.shared.config.idle_fps
        };
        self.shared.render_period.send_replace(period(fps));
        debug!(animating, fps, "render rate changed");
    }

    /// Current render loop period.
    pub fn render_period(&self) -> Duration {
        *self.shared.render_period.borrow()
    }

    /// Spawn the supervisor. Loops start as soon as the session is
    /// connected (immediately if it already is).
    pub fn start(&self) -> JoinHandle<()> {
        tokio::spawn(supervise(Arc::clone(&self.shared), self.cancel.clone()))
    }

    /// Stop both loops and the supervisor. Does not wait for a transfer
    /// in flight.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ── Supervisor ───────────────────────────────────────────────────

/// Loops for one connected episode.
struct Episode {
    since: Instant,
    cancel: CancellationToken,
}

impl Episode {
    fn start(shared: &Arc<Shared>, since: Instant, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        tokio::spawn(render_loop(Arc::clone(shared), cancel.clone()));
        tokio::spawn(delivery_loop(Arc::clone(shared), cancel.clone()));
        Self { since, cancel }
    }
}

impl Drop for Episode {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn supervise(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut state = shared.session.subscribe();
    let mut episode: Option<Episode> = None;

    loop {
        let since = match &*state.borrow_and_update() {
            SessionState::Connected { since, .. } => Some(*since),
            _ => None,
        };

        match (since, episode.as_ref().map(|e| e.since)) {
            (Some(now), Some(running)) if now == running => {}
            (Some(now), _) => {
                if episode.take().is_some() {
                    debug!("new connection, restarting loops");
                }
                info!("connected, starting loops");
                episode = Some(Episode::start(&shared, now, &cancel));
            }
            (None, Some(_)) => {
                info!("disconnected, stopping loops");
                episode = None;
            }
            (None, None) => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    drop(episode);
    debug!("pipeline stopped");
}

// ── Render loop ──────────────────────────────────────────────────

async fn render_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut period_rx = shared.render_period.subscribe();
    let mut interval = ticker(*period_rx.borrow_and_update());
    let mut last_render: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            changed = period_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                interval = ticker(*period_rx.borrow_and_update());
            }

            _ = interval.tick() => {
                if !shared.signal.is_dirty() {
                    continue;
                }
                if last_render.is_some_and(|t| t.elapsed() < shared.config.min_render_interval) {
                    continue;
                }
                shared.signal.take();
                last_render = Some(Instant::now());

                let s = Arc::clone(&shared);
                let task = tokio::task::spawn_blocking(move || s.render_and_record());
                let result = tokio::select! {
                    biased;
                    r = task => r,
                    _ = cancel.cancelled() => break,
                };
                if let Err(e) = result {
                    shared.stats.record_render_failure();
                    warn!(error = %e, "render task panicked");
                }
            }
        }
    }

    trace!("render loop stopped");
}

// ── Delivery loop ────────────────────────────────────────────────

async fn delivery_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut interval = ticker(period(shared.config.display_fps));
    let mut meter = ThroughputMeter::new();
    let mut last_report = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let (frame, keep_alive) = match shared.frames.latest() {
            Some(frame) => (frame, false),
            None => (shared.keep_alive.clone(), true),
        };
        let bytes = (FRAME_HEADER_LEN + frame.len()) as u64;

        let s = Arc::clone(&shared);
        let task = tokio::task::spawn_blocking(move || s.deliver(&frame, keep_alive));
        let result = tokio::select! {
            biased;
            r = task => r,
            _ = cancel.cancelled() => break,
        };

        match result {
            Ok(Ok(())) => meter.record(bytes),
            Ok(Err(_)) => {}
            Err(e) => {
                shared.stats.record_send_failure();
                warn!(error = %e, "delivery task panicked");
            }
        }

        if last_report.elapsed() >= Duration::from_secs(5) {
            let snap = shared.stats.snapshot();
            debug!(
                delivered = snap.delivered,
                keep_alives = snap.keep_alives,
                rendered = snap.rendered,
                bytes_per_sec = meter.bytes_per_sec(),
                "delivery stats"
            );
            last_report = Instant::now();
        }
    }

    trace!("delivery loop stopped");
}

// ── Tests ────────────────────────────────────────────────────────
