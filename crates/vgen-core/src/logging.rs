//! Logging init: append to a file under the XDG state dir, or fall back to
//! stderr when the state dir is unwritable.

use anyhow::Result;
use std::fs;
use std::io;
use tracing_subscriber::EnvFilter;

/// Per-event writer: the log file when it can be cloned, stderr otherwise.
enum LogSink {
    File(fs::File),
    Stderr,
}

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogSink::File(f) => f.write(buf),
            LogSink::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogSink::File(f) => f.flush(),
            LogSink::Stderr => io::stderr().lock().flush(),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vgen=debug"))
}

/// Initialize structured logging to `~/.local/state/vgen/vgen.log`.
/// On failure (e.g. log dir unwritable), returns Err so the caller can fall
/// back to [`init_logging_stderr`].
pub fn init_logging() -> Result<()> {
    let state_dir = xdg::BaseDirectories::with_prefix("vgen")?.get_state_home();
    fs::create_dir_all(&state_dir)?;
    let log_path = state_dir.join("vgen.log");

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(move || {
            file.try_clone()
                .map(LogSink::File)
                .unwrap_or(LogSink::Stderr)
        })
        .with_ansi(false)
        .init();

    tracing::info!("vgen logging initialized at {}", log_path.display());
    Ok(())
}

/// Stderr-only logging. Use when `init_logging` fails so the CLI still runs.
pub fn init_logging_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}
