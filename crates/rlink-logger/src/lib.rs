//! Log file and console diagnostics for the rlink workspace
//!
//! Every record goes to the log file (when one is set) as
//! `[timestamp] [SOURCE] LEVEL message`. `RUST` marks the bridge itself and
//! `R` marks text produced by the embedded runtime. The console only sees
//! what the current verbosity lets through.

use colored::{ColoredString, Colorize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

const LOG_FILE_NAME: &str = "rlink.log";

struct LoggerState {
    file: Option<PathBuf>,
    verbosity: u8,
    log_runtime_output: bool,
}

static STATE: Mutex<LoggerState> = Mutex::new(LoggerState {
    file: None,
    verbosity: 0,
    log_runtime_output: false,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Bridge,
    Runtime,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Bridge => "RUST",
            Source::Runtime => "R",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    /// Console prefix; `None` prints the message bare
    fn prefix(self) -> Option<ColoredString> {
        match self {
            Level::Debug => Some("DEBUG:".blue().bold()),
            Level::Info => None,
            Level::Warn => Some("warning:".yellow().bold()),
            Level::Error => Some("Error:".red().bold()),
        }
    }

    /// Lowest verbosity at which the level reaches the console
    fn console_threshold(self) -> u8 {
        match self {
            Level::Debug | Level::Info => 1,
            Level::Warn | Level::Error => 0,
        }
    }
}

fn with_state<T>(read: impl FnOnce(&mut LoggerState) -> T) -> Option<T> {
    STATE.lock().ok().map(|mut state| read(&mut state))
}

pub fn get_verbosity() -> u8 {
    with_state(|s| s.verbosity).unwrap_or(0)
}

/// 0 shows warnings and errors, 1 adds info and debug, 2 adds R's stderr
pub fn set_verbosity(verbosity: u8) {
    with_state(|s| s.verbosity = verbosity);
}

/// Whether R console output is mirrored into the log file
pub fn get_log_runtime_output() -> bool {
    with_state(|s| s.log_runtime_output).unwrap_or(false)
}

pub fn set_log_runtime_output(enabled: bool) {
    with_state(|s| s.log_runtime_output = enabled);
}

/// Set verbosity and start a fresh log under the rlink config directory
pub fn init_with_verbosity(verbosity: u8, log_runtime_output: bool) -> Result<(), String> {
    set_verbosity(verbosity);
    set_log_runtime_output(log_runtime_output);

    let config_dir = config_dir()?;
    fs::create_dir_all(&config_dir)
        .map_err(|e| format!("Failed to create config directory: {}", e))?;
    set_log_file(config_dir.join(LOG_FILE_NAME))
}

/// Log to `log_file` from now on, discarding what it held before
pub fn set_log_file(log_file: PathBuf) -> Result<(), String> {
    if log_file.exists() {
        fs::remove_file(&log_file).map_err(|e| format!("Failed to truncate log file: {}", e))?;
    }
    with_state(|s| s.file = Some(log_file)).ok_or_else(|| "Logger state poisoned".to_string())
}

pub fn get_log_path() -> Option<PathBuf> {
    with_state(|s| s.file.clone()).flatten()
}

fn config_dir() -> Result<PathBuf, String> {
    #[cfg(not(target_os = "windows"))]
    let base = dirs::home_dir()
        .ok_or("Could not determine home directory")?
        .join(".config");

    #[cfg(target_os = "windows")]
    let base = dirs::config_dir().ok_or("Could not determine config directory")?;

    Ok(base.join("rlink"))
}

fn append(source: Source, line: &str) {
    let Some(path) = get_log_path() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let _ = writeln!(file, "[{}] [{}] {}", timestamp, source, line);
    }
}

fn record(level: Level, message: &str) {
    append(Source::Bridge, &format!("{} {}", level.tag(), message));
    if get_verbosity() < level.console_threshold() {
        return;
    }
    match level.prefix() {
        Some(prefix) => eprintln!("{} {}", prefix, message),
        None => eprintln!("{}", message),
    }
}

pub fn debug(message: &str) {
    record(Level::Debug, message);
}

pub fn info(message: &str) {
    record(Level::Info, message);
}

pub fn warn(message: &str) {
    record(Level::Warn, message);
}

pub fn error(message: &str) {
    record(Level::Error, message);
}

/// Mirror a chunk of R console output into the log file
///
/// Does nothing unless runtime output logging is on. The chunk reaches the
/// session's sink regardless.
pub fn runtime(chunk: &str) {
    if !get_log_runtime_output() {
        return;
    }
    let trimmed = chunk.trim_end_matches('\n');
    if !trimmed.is_empty() {
        append(Source::Runtime, trimmed);
    }
}

/// A line R wrote to its stderr outside of any request
pub fn runtime_diagnostic(line: &str) {
    append(Source::Runtime, &format!("STDERR {}", line));
    if get_verbosity() >= 2 {
        eprintln!("{} {}", "R:".magenta().bold(), line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Logger state is global, so everything touching the file lives in one test
    #[test]
    fn test_log_file_lines_are_tagged() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join(LOG_FILE_NAME);
        fs::write(&log_path, "stale contents\n").unwrap();

        set_log_file(log_path.clone()).unwrap();
        assert_eq!(get_log_path(), Some(log_path.clone()));
        assert!(!log_path.exists(), "set_log_file should truncate");

        debug("opening session");
        runtime("[1] 1\n");
        set_log_runtime_output(true);
        runtime("[1] 2\n");
        runtime("\n");
        set_log_runtime_output(false);
        runtime_diagnostic("WARNING: ignoring environment value of R_HOME");

        let contents = fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("[RUST] DEBUG opening session"));
        assert!(!contents.contains("[1] 1"));
        assert!(contents.contains("[R] [1] 2"));
        assert!(contents.contains("[R] STDERR WARNING: ignoring"));
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn test_levels_reach_console_by_verbosity() {
        assert_eq!(Level::Warn.console_threshold(), 0);
        assert_eq!(Level::Debug.console_threshold(), 1);
        assert!(Level::Info.prefix().is_none());
        assert_eq!(Source::Runtime.to_string(), "R");
    }

    #[test]
    fn test_verbosity_roundtrip() {
        let before = get_verbosity();
        set_verbosity(2);
        assert_eq!(get_verbosity(), 2);
        set_verbosity(before);
    }
}
