//! Tracing setup.
//!
//! Logs go to stdout through a compact formatter, filtered by `RUST_LOG`
//! (default `info`). Setting `DOCUCHAT_LOG_FILE` adds a second, ANSI-free
//! layer appending to that path through a non-blocking writer.

use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Keeps the non-blocking writer's flush thread alive for the process
// lifetime; dropping the guard would silently stop file output.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the tracing subscriber. Call once, before any component logs.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry().with(filter).with(stdout);

    let log_file = std::env::var("DOCUCHAT_LOG_FILE").ok().and_then(|path| {
        if let Some(parent) = std::path::Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    eprintln!("Failed to create log directory for {path}: {err}");
                    return None;
                }
            }
        }
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(err) => {
                eprintln!("Failed to open log file {path}: {err}");
                None
            }
        }
    });

    match log_file {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false).compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}
