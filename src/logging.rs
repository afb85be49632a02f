// src/logging.rs
//
// stderr logging with an optional copy in a per-run file. stdout belongs to
// the control channel, so nothing here may ever print there.

use std::path::Path;
use std::sync::Mutex;

/// Open per-run log file, if file logging was requested
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Symlink in the log directory naming the newest run's file (Unix only)
const CURRENT_LOG_LINK: &str = "webserial-bridge.log";

/// Wall-clock prefix shared by every log line
pub(crate) fn stamp() -> impl std::fmt::Display {
    chrono::Local::now().format("%H:%M:%S%.3f")
}

/// Log to stderr only. Used while LOG_FILE is locked or being replaced.
fn stderr_only(msg: std::fmt::Arguments<'_>) {
    eprintln!("{} [logging] {}", stamp(), msg);
}

/// Start copying log lines into `<log_dir>/<YYYYmmdd-HHMMSS>-webserial-bridge.log`.
pub(crate) fn init_file_logging(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Cannot create log directory {}: {}", log_dir.display(), e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-webserial-bridge.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Cannot open log file {}: {}", log_path.display(), e))?;

    #[cfg(unix)]
    {
        let link = log_dir.join(CURRENT_LOG_LINK);
        let _ = std::fs::remove_file(&link);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &link) {
            stderr_only(format_args!("Could not point {} at this run: {}", CURRENT_LOG_LINK, e));
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }
    stderr_only(format_args!("Writing log to {}", log_path.display()));
    Ok(())
}

/// Close the log file; later lines go to stderr only.
pub(crate) fn stop_file_logging() {
    let closed = LOG_FILE
        .lock()
        .map(|mut guard| guard.take().is_some())
        .unwrap_or(false);
    if closed {
        stderr_only(format_args!("Log file closed"));
    }
}

/// `tlog!("[tag] ...", args)`: one timestamped line on stderr, mirrored to the
/// log file while one is open.
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let line = format!("{} {}", $crate::logging::stamp(), format_args!($($arg)*));
        eprintln!("{}", line);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = writeln!(file, "{}", line);
            }
        }
    }};
}
