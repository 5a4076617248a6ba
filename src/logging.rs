//! Log setup for a single call-out.
//!
//! stdout carries the JSON status back to the kubelet, so log lines go to
//! the driver log file, each prefixed with the process id to tell
//! concurrent call-outs apart.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::sync::Mutex;

use camino::Utf8Path;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Environment variable holding the log filter directives.
pub const LOG_FILTER_ENV: &str = "OCI_FLEXD_LOG";
const DEFAULT_FILTER: &str = "info";

/// Timer that writes the process id ahead of the timestamp.
#[derive(Clone, Copy, Debug)]
pub struct PidTimer {
    pid: u32,
}

impl PidTimer {
    /// Timer for the current process.
    #[must_use]
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
        }
    }
}

impl FormatTime for PidTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{} ", self.pid)?;
        SystemTime.format_time(w)
    }
}

/// Builds the filter from `OCI_FLEXD_LOG`, defaulting to `info`.
#[must_use]
pub fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn open_log(path: &Utf8Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Installs the global subscriber writing to `log_file`.
///
/// When the file cannot be opened the subscriber writes to stderr instead.
/// Returns `false` in that case so the caller can report it.
#[must_use]
pub fn init(log_file: &Utf8Path) -> bool {
    let (writer, to_file) = match open_log(log_file) {
        Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), true),
        Err(_) => (BoxMakeWriter::new(io::stderr), false),
    };
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_timer(PidTimer::current())
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .is_ok();
    installed && to_file
}
