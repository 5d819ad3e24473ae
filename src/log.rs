//! Logging setup for hive.
//!
//! Everything logs through `tracing`. The long-running orchestrator writes to
//! `~/.hive/hive.log` (truncated on startup); one-shot CLI commands log to
//! stderr instead.
//!
//! Debug mode can be enabled with the `--debug` flag or `HIVE_DEBUG=1`.
//! `RUST_LOG`, when set, overrides both.

use std::fs::File;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::Result;

pub const DEBUG_ENV: &str = "HIVE_DEBUG";

/// True when `--debug` was passed or `HIVE_DEBUG` is `1`/`true`.
pub fn debug_requested(flag: bool) -> bool {
    flag || std::env::var(DEBUG_ENV)
        .map(|v| env_enables_debug(&v))
        .unwrap_or(false)
}

fn env_enables_debug(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("hive=debug")
        } else {
            EnvFilter::new("hive=info")
        }
    })
}

/// Log to `~/.hive/hive.log`.
pub fn init(debug: bool) -> Result<()> {
    let dir = Config::hive_dir()?;
    std::fs::create_dir_all(&dir)?;
    let file = File::create(Config::log_path()?)?;

    let _ = tracing_subscriber::registry()
        .with(filter(debug_requested(debug)))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init();
    Ok(())
}

/// Log to stderr.
pub fn init_stderr(debug: bool) {
    let _ = tracing_subscriber::registry()
        .with(filter(debug_requested(debug)))
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .try_init();
}
