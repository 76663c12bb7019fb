use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::BridgeError;

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

const LOG_NAME: &str = "aia360-bridge";

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Initialise file logging to the given directory.
/// Creates a timestamped log file and an `aia360-bridge.log` symlink (Unix only).
pub fn init_file_logging(log_dir: &Path) -> Result<PathBuf, BridgeError> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| BridgeError::config(format!("Failed to create log dir {}: {}", log_dir.display(), e)))?;

    let filename = chrono::Local::now()
        .format(&format!("%Y%m%d-%H%M%S-{}.log", LOG_NAME))
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| BridgeError::config(format!("Failed to create log file: {}", e)))?;

    // Windows symlinks require elevated privileges
    #[cfg(unix)]
    {
        let symlink_path = log_dir.join(format!("{}.log", LOG_NAME));
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!(
                "{} [logging] Failed to create {}.log symlink: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                LOG_NAME,
                e
            );
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    tlog!("[logging] File logging started: {}", log_path.display());

    Ok(log_path)
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    let was_open = match LOG_FILE.lock() {
        Ok(mut guard) => guard.take().is_some(),
        Err(_) => false,
    };
    if was_open {
        tlog!("[logging] File logging stopped");
    }
}
