//! Crash handling and diagnostics
//!
//! Panics and fatal pipeline errors are written to a dedicated crash log
//! file that is flushed synchronously, so the report survives the abort
//! that follows.

use std::fs::OpenOptions;
use std::io::Write;
use std::panic::PanicInfo;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::error;

/// Global crash log file path, set during initialization
static CRASH_LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

const CRASH_LOG_FILENAME: &str = "crash.log";

/// Initialize crash handling. Call this early in main().
///
/// Returns the path to the crash log file.
pub fn init_crash_handler(log_dir: &Path) -> std::io::Result<PathBuf> {
    let crash_log_path = log_dir.join(CRASH_LOG_FILENAME);

    // Fail early if the file can't be created.
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&crash_log_path)?;

    let _ = CRASH_LOG_PATH.set(crash_log_path.clone());

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        handle_panic(panic_info);
        default_hook(panic_info);
    }));

    Ok(crash_log_path)
}

fn timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

fn write_report(report: &str) {
    if let Some(path) = CRASH_LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = file.write_all(report.as_bytes());
            let _ = file.flush();
            let _ = file.sync_all();
        }
    }
}

fn format_report(title: &str, body: &str) -> String {
    let separator = "=".repeat(80);
    format!(
        "\n{sep}\n{title} at {ts}\n{sep}\n{body}\n{sep}\n",
        sep = separator,
        title = title,
        ts = timestamp(),
        body = body
    )
}

/// Handle a Rust panic by logging it to the crash log
fn handle_panic(panic_info: &PanicInfo) {
    let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic payload".to_string()
    };

    let location = if let Some(loc) = panic_info.location() {
        format!("{}:{}:{}", loc.file(), loc.line(), loc.column())
    } else {
        "unknown location".to_string()
    };

    let thread = std::thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string();
    let backtrace = std::backtrace::Backtrace::force_capture();

    write_report(&format_report(
        "PANIC",
        &format!(
            "Thread: {}\nLocation: {}\nMessage: {}\n\nBacktrace:\n{}",
            thread, location, message, backtrace
        ),
    ));

    // May not be flushed if we're crashing
    error!(
        "PANIC at {}: {} (see crash.log for full backtrace)",
        location, message
    );
}

fn fatal_report(reason: &str, snapshot: Option<&serde_json::Value>) -> String {
    let snapshot = snapshot
        .and_then(|s| serde_json::to_string_pretty(s).ok())
        .unwrap_or_else(|| "<none>".to_string());
    let backtrace = std::backtrace::Backtrace::force_capture();
    format_report(
        "FATAL PIPELINE ERROR",
        &format!(
            "Reason: {}\n\nPipeline state:\n{}\n\nBacktrace:\n{}",
            reason, snapshot, backtrace
        ),
    )
}

/// Record a fatal pipeline error with the pipeline state and abort.
pub fn abort_with_diagnostics(reason: &str, snapshot: Option<serde_json::Value>) -> ! {
    write_report(&fatal_report(reason, snapshot.as_ref()));
    error!("Aborting after fatal pipeline error: {}", reason);
    eprintln!("streamcast: fatal pipeline error: {}", reason);
    std::process::abort()
}

/// Log a critical operation marker to the crash log.
/// Call this before operations that might crash to help diagnose where crashes occur.
pub fn log_critical_operation(operation: &str) {
    let msg = format!("[{}] CRITICAL_OP: {}\n", timestamp(), operation);

    if let Some(path) = CRASH_LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = file.write_all(msg.as_bytes());
            let _ = file.flush();
        }
    }
}

/// Get the crash log path
pub fn get_crash_log_path() -> Option<&'static PathBuf> {
    CRASH_LOG_PATH.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_report_includes_reason_and_snapshot() {
        let snapshot = serde_json::json!({ "active": [0, 1, 2] });
        let report = fatal_report("device lost: display 0", Some(&snapshot));
        assert!(report.contains("FATAL PIPELINE ERROR"));
        assert!(report.contains("Reason: device lost: display 0"));
        assert!(report.contains("\"active\""));
    }

    #[test]
    fn test_fatal_report_without_snapshot() {
        let report = fatal_report("clock", None);
        assert!(report.contains("Pipeline state:\n<none>"));
    }
}
