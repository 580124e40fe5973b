use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use syslog::{Facility, Formatter3164};

/// Log verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    #[default]
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl FromStr for LogLevel {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(()),
        }
    }
}

type SyslogSink = syslog::Logger<syslog::LoggerBackend, Formatter3164>;

struct Sinks {
    file: Option<std::fs::File>,
    syslog: Option<Mutex<SyslogSink>>,
}

/// Stderr/file logger with levels, an optional file sink and an optional syslog sink.
/// Clones share the same sinks, so the monitor thread and screen modules can each hold one.
#[derive(Clone)]
pub struct Logger {
    level: LogLevel,
    sinks: Arc<Sinks>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").field("level", &self.level).finish()
    }
}

impl Logger {
    pub fn new(level: LogLevel, file_path: Option<String>) -> Self {
        let env_level = std::env::var("MICROPANEL_LOG_LEVEL")
            .ok()
            .and_then(|s| LogLevel::from_str(&s).ok());
        let effective_level = env_level.unwrap_or(level);

        let env_file = std::env::var("MICROPANEL_LOG_PATH").ok();
        let path = file_path.or(env_file);
        let file = path.and_then(|p| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(p)
                .ok()
        });

        let want_syslog = std::env::var("MICROPANEL_SYSLOG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let syslog = if want_syslog { open_syslog() } else { None };

        Self {
            level: effective_level,
            sinks: Arc::new(Sinks {
                file,
                syslog: syslog.map(Mutex::new),
            }),
        }
    }

    /// Logger that drops everything; handy for tests and one-shot helpers.
    pub fn silent() -> Self {
        Self {
            level: LogLevel::Error,
            sinks: Arc::new(Sinks {
                file: None,
                syslog: None,
            }),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn log(&self, level: LogLevel, msg: impl AsRef<str>) {
        if level > self.level {
            return;
        }
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let line = format!("[{ts:.3}] [{level:?}] {}", msg.as_ref());
        eprintln!("{line}");
        if let Some(mut file) = self.sinks.file.as_ref() {
            let _ = writeln!(file, "{line}");
        }
        if let Some(sink) = self.sinks.syslog.as_ref() {
            if let Ok(mut sink) = sink.lock() {
                let msg = msg.as_ref();
                let _ = match level {
                    LogLevel::Error => sink.err(msg),
                    LogLevel::Warn => sink.warning(msg),
                    LogLevel::Info => sink.info(msg),
                    LogLevel::Debug | LogLevel::Trace => sink.debug(msg),
                };
            }
        }
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Error, msg);
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Warn, msg);
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Info, msg);
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Debug, msg);
    }

    pub fn trace(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Trace, msg);
    }
}

fn open_syslog() -> Option<SyslogSink> {
    let formatter = Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "micropanel".into(),
        pid: std::process::id(),
    };
    syslog::unix(formatter).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(LogLevel::from_str("WARNING"), Ok(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("trace"), Ok(LogLevel::Trace));
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn file_sink_receives_lines_at_or_above_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.log");
        let logger = Logger::new(LogLevel::Info, Some(path.display().to_string()));
        if logger.level() != LogLevel::Info {
            // MICROPANEL_LOG_LEVEL is set in the environment; nothing to assert.
            return;
        }
        logger.info("visible");
        logger.debug("hidden");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[Info] visible"));
        assert!(!contents.contains("hidden"));
    }
}
