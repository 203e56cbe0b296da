//! Push display service — entry point.
//!
//! ```text
//! push-display                       Run in the foreground
//! push-display --config <path>       Load a custom config TOML
//! push-display --gen-config          Write default config to stdout
//! push-display --pattern bars        Override the demo pattern
//! push-display --device push3        Simulate a specific model
//! push-display --animate             Start in animating mode
//! push-display --unplug-after 5      Exercise hotplug after 5 s
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use push_display::config::DisplayConfig;
use push_display::service::DisplayService;
use push_display_core::device::PushDevice;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "push-display", about = "Stream test patterns to a Push display")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "push-display.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Demo pattern: gradient, bars, black, white or solid:RRGGBB.
    #[arg(short, long)]
    pattern: Option<String>,

    /// Device model: push2, push3 or push3-sa.
    #[arg(short, long)]
    device: Option<PushDevice>,

    /// Start in animating mode.
    #[arg(long)]
    animate: bool,

    /// Unplug the simulated device after this many seconds.
    #[arg(long, value_name = "SECS")]
    unplug_after: Option<u64>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&DisplayConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Read config; its diagnostics are logged once tracing is up.
    let loaded = DisplayConfig::try_load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DisplayConfig::log_level(&loaded)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Resolve config, then apply CLI overrides.
    let mut config = DisplayConfig::from_load_result(&cli.config, loaded);
    if let Some(pattern) = cli.pattern {
        config.demo.pattern = pattern;
    }
    if let Some(device) = cli.device {
        config.device.preferred = Some(device);
    }
    if cli.animate {
        config.display.animating = true;
    }

    let device = config.device.preferred.unwrap_or(PushDevice::Push2);
    info!("push-display v{}", env!("CARGO_PKG_VERSION"));
    info!("device: {device}");
    info!("pattern: {}", config.demo.pattern);
    info!(
        "render {} fps, delivery {} fps",
        config.display.render_fps, config.display.display_fps
    );

    let mut service = DisplayService::new(config, device);
    if let Some(secs) = cli.unplug_after {
        service = service.with_unplug_after(Duration::from_secs(secs));
    }

    // Ctrl-C handler.
    let cancel = service.cancel_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        cancel.cancel();
    });

    service.run().await?;

    Ok(())
}
