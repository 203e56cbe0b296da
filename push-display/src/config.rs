//! Configuration for the display service.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use push_display_core::device::PushDevice;
use push_display_core::display::{PipelineConfig, TestPattern};
use push_display_core::error::PushError;
use push_display_core::session::SessionConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub device: DeviceSection,
    pub display: DisplaySection,
    pub reconnect: ReconnectSection,
    pub demo: DemoSection,
    pub logging: LoggingConfig,
}

/// Device selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Model to use when several are attached: "push2", "push3",
    /// "push3-sa". First discovered when unset.
    pub preferred: Option<PushDevice>,
}

/// Render and delivery cadences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySection {
    /// Render rate before any animating / idle switch.
    pub render_fps: u32,
    pub animating_fps: u32,
    pub idle_fps: u32,
    /// Delivery rate.
    pub display_fps: u32,
    pub min_render_interval_ms: u64,
    /// Start in animating mode.
    pub animating: bool,
}

/// Reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub interval_ms: u64,
    /// No reconnect attempt this soon after a disconnect.
    pub debounce_ms: u64,
    /// Delay after a hotplug event before attempting to connect.
    pub settle_ms: u64,
}

/// Built-in content shown by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSection {
    /// "gradient", "bars" or "solid".
    pub pattern: String,
    /// RRGGBB hex colour used by "solid".
    pub color: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            render_fps: 30,
            animating_fps: 60,
            idle_fps: 10,
            display_fps: 30,
            min_render_interval_ms: 16,
            animating: false,
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            debounce_ms: 1000,
            settle_ms: 250,
        }
    }
}

impl Default for DemoSection {
    fn default() -> Self {
        Self {
            pattern: "gradient".into(),
            color: "ff0000".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

const MAX_FPS: u32 = 120;
const MIN_INTERVAL_MS: u64 = 10;

fn clamp_fps(fps: u32) -> u32 {
    fps.clamp(1, MAX_FPS)
}

fn clamp_ms(ms: u64) -> Duration {
    Duration::from_millis(ms.max(MIN_INTERVAL_MS))
}

impl DisplayConfig {
    /// Read a TOML file. `Ok(None)` when the file does not exist.
    pub fn try_load(path: &Path) -> Result<Option<Self>, PushError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PushError::Config(format!("{}: {e}", path.display())));
            }
        };
        toml::from_str(&contents)
            .map(Some)
            .map_err(|e| PushError::Config(format!("{}: {e}", path.display())))
    }

    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        Self::from_load_result(path, Self::try_load(path))
    }

    /// Resolve a [`try_load`](Self::try_load) outcome, logging the
    /// fallback. Call after the subscriber is installed.
    pub fn from_load_result(path: &Path, loaded: Result<Option<Self>, PushError>) -> Self {
        match loaded {
            Ok(Some(cfg)) => {
                tracing::info!("loaded config from {}", path.display());
                cfg
            }
            Ok(None) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("invalid config ({e}); using defaults");
                Self::default()
            }
        }
    }

    /// Log level from a load outcome, for initialising the subscriber
    /// before the outcome itself is logged.
    pub fn log_level(loaded: &Result<Option<Self>, PushError>) -> String {
        match loaded {
            Ok(Some(cfg)) => cfg.logging.level.clone(),
            _ => LoggingConfig::default().level,
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        let d = &self.display;
        PipelineConfig {
            render_fps: clamp_fps(d.render_fps),
            animating_fps: clamp_fps(d.animating_fps),
            idle_fps: clamp_fps(d.idle_fps),
            display_fps: clamp_fps(d.display_fps),
            min_render_interval: clamp_ms(d.min_render_interval_ms),
        }
    }

    pub fn to_session_config(&self) -> SessionConfig {
        let r = &self.reconnect;
        SessionConfig {
            preferred: self.device.preferred,
            reconnect_interval: clamp_ms(r.interval_ms),
            debounce: clamp_ms(r.debounce_ms),
            settle_delay: clamp_ms(r.settle_ms),
        }
    }

    /// Parse the demo pattern.
    pub fn to_pattern(&self) -> Result<TestPattern, PushError> {
        let demo = &self.demo;
        if demo.pattern.eq_ignore_ascii_case("solid") {
            TestPattern::from_str(&format!("solid:{}", demo.color))
        } else {
            TestPattern::from_str(&demo.pattern)
        }
        .map_err(|e| PushError::Config(format!("demo pattern: {e}")))
    }
}

// ── Tests ────────────────────────────────────────────────────────
