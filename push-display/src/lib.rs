//! # push-display — Push display service
//!
//! Foreground service that renders a built-in test pattern and streams
//! it to a Push 2 / Push 3 display, following the device through
//! unplug and replug.
//!
//! The bus is simulated in-process; `--unplug-after` exercises the
//! hotplug and reconnect path.

pub mod config;
pub mod service;
