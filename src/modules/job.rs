//! Long-running list actions: one child process, polled once per tick, with a progress estimate.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::app::Logger;
use crate::process::{read_output, ExternalProcess, Output};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl JobState {
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Timeout)
    }
}

/// Tracks one asynchronous action. `process` is present exactly while the state is `Running`.
#[derive(Debug)]
pub struct AsyncJob {
    state: JobState,
    process: Option<ExternalProcess>,
    started_at: Instant,
    timeout: Duration,
    log_path: Option<PathBuf>,
    parse_progress: bool,
    last_shown: Option<(u8, String)>,
    message: String,
}

impl AsyncJob {
    /// Spawn `command`. A spawn failure yields a job already in `Failed`.
    pub fn start(
        command: &str,
        log_path: Option<PathBuf>,
        timeout: Duration,
        parse_progress: bool,
        logger: &Logger,
    ) -> Self {
        let output = log_path.clone().map_or(Output::Null, Output::File);
        let (state, process, message) = match ExternalProcess::spawn(command, &output) {
            Ok(process) => {
                logger.debug(format!("async job started with pid {}: {command}", process.pid()));
                (JobState::Running, Some(process), String::new())
            }
            Err(err) => {
                logger.warn(format!("failed to start async job '{command}': {err}"));
                (JobState::Failed, None, "Failed to start process".to_string())
            }
        };
        Self {
            state,
            process,
            started_at: Instant::now(),
            timeout: timeout.max(Duration::from_secs(1)),
            log_path,
            parse_progress,
            last_shown: None,
            message,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ExternalProcess::pid)
    }

    /// Failure text for the result screen; lines separated by `\n`.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Advance the state machine: reap a finished child, or kill one that ran out of time.
    pub fn poll(&mut self, logger: &Logger) -> JobState {
        let elapsed = self.elapsed();
        let Some(process) = self.process.as_mut() else {
            return self.state;
        };
        match process.try_wait() {
            Ok(Some(status)) => {
                logger.debug(format!(
                    "async job finished after {} with {status}",
                    humantime::format_duration(round_secs(elapsed))
                ));
                self.process = None;
                if self.log_path.as_deref().map_or(true, log_reports_success) {
                    self.state = JobState::Completed;
                } else {
                    self.state = JobState::Failed;
                    self.message = "Update failed!".to_string();
                }
            }
            Ok(None) if elapsed >= self.timeout => {
                logger.warn(format!(
                    "async job timed out after {}",
                    humantime::format_duration(self.timeout)
                ));
                if let Err(err) = process.terminate() {
                    logger.warn(format!("failed to reap timed out job: {err}"));
                }
                self.process = None;
                self.state = JobState::Timeout;
                self.message = "Action timed-out\nUpdate failed!".to_string();
            }
            Ok(None) => {}
            Err(err) => {
                logger.warn(format!("error checking async job: {err}"));
                let _ = process.terminate();
                self.process = None;
                self.state = JobState::Failed;
                self.message = "Update status error".to_string();
            }
        }
        self.state
    }

    /// Stop a running child and go back to `Idle`.
    pub fn cancel(&mut self, logger: &Logger) {
        if let Some(mut process) = self.process.take() {
            logger.debug(format!("killing async job {}", process.pid()));
            if let Err(err) = process.terminate() {
                logger.warn(format!("failed to reap cancelled job: {err}"));
            }
        }
        self.state = JobState::Idle;
    }

    /// The user dismissed the result screen.
    pub fn acknowledge(&mut self) {
        if self.state.is_finished() {
            self.state = JobState::Idle;
        }
    }

    pub fn progress_pct(&self) -> u8 {
        if self.parse_progress {
            if let Some(pct) = self
                .log_path
                .as_deref()
                .and_then(|p| parse_last_percentage(&read_output(p)))
            {
                return pct;
            }
        }
        linear_progress(self.elapsed(), self.timeout)
    }

    /// `NN% - M:SS`, or `None` when neither value changed since the last call.
    pub fn progress_update(&mut self) -> Option<String> {
        let pct = self.progress_pct();
        let time = format_elapsed(self.elapsed());
        if self.last_shown.as_ref() == Some(&(pct, time.clone())) {
            return None;
        }
        let line = format!("{pct}% - {time}");
        self.last_shown = Some((pct, time));
        Some(line)
    }
}

fn round_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}

/// `min(99, elapsed * 100 / timeout)`.
pub fn linear_progress(elapsed: Duration, timeout: Duration) -> u8 {
    let timeout = timeout.as_secs().max(1);
    (elapsed.as_secs() * 100 / timeout).min(99) as u8
}

/// `M:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Integer part of the last `NN.N%` token in the text.
pub fn parse_last_percentage(text: &str) -> Option<u8> {
    let mut last = None;
    for line in text.lines() {
        for (pos, _) in line.match_indices('%') {
            let digits = line[..pos]
                .char_indices()
                .rev()
                .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
                .last()
                .map(|(i, _)| &line[i..pos]);
            if let Some(value) = digits.and_then(|d| d.parse::<f64>().ok()) {
                last = Some(value.clamp(0.0, 100.0) as u8);
            }
        }
    }
    last
}

/// A success marker and no error marker anywhere in the log.
pub fn log_reports_success(path: &Path) -> bool {
    match std::fs::read(path) {
        Ok(bytes) => text_reports_success(&String::from_utf8_lossy(&bytes)),
        Err(_) => false,
    }
}

pub fn text_reports_success(text: &str) -> bool {
    const SUCCESS: [&str; 3] = [
        "[SUCCESS]",
        "Flash verification successful",
        "Optionbyte verification successful",
    ];
    const ERROR: [&str; 4] = ["[ERROR]", "Error", "Failed", "failed"];
    let mut found_success = false;
    let mut found_error = false;
    for line in text.lines() {
        found_success |= SUCCESS.iter().any(|m| line.contains(m));
        found_error |= ERROR.iter().any(|m| line.contains(m));
    }
    found_success && !found_error
}
