//! Child processes run through `/bin/sh -c` and polled without blocking the main loop.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::{Error, Result};

pub const TERMINATE_GRACE: Duration = Duration::from_secs(1);
/// Upper bound for helper scripts whose output is read inline.
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);
const REAP_POLL: Duration = Duration::from_millis(20);

static CAPTURE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Where a child's stdout and stderr go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Null,
    /// Truncate and write to this file.
    File(PathBuf),
    /// Stdout to this file, stderr discarded.
    Stdout(PathBuf),
}

/// Spawned shell command. The child is reaped exactly once, by `try_wait`,
/// `wait` or `terminate`, and is terminated on drop if still running.
#[derive(Debug)]
pub struct ExternalProcess {
    child: Child,
    command: String,
    started_at: Instant,
    status: Option<ExitStatus>,
}

impl ExternalProcess {
    pub fn spawn(command: &str, output: &Output) -> Result<Self> {
        let (stdout, stderr) = match output {
            Output::Null => (Stdio::null(), Stdio::null()),
            Output::File(path) => {
                let file = File::create(path)?;
                let err = file.try_clone()?;
                (Stdio::from(file), Stdio::from(err))
            }
            Output::Stdout(path) => (Stdio::from(File::create(path)?), Stdio::null()),
        };
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()?;
        Ok(Self {
            child,
            command: command.to_string(),
            started_at: Instant::now(),
            status: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_running(&self) -> bool {
        self.status.is_none()
    }

    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Non-blocking completion check.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// Block until the child exits.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }

    /// SIGTERM, up to `grace` for a clean exit, then SIGKILL and a blocking reap.
    pub fn terminate_with_grace(&mut self, grace: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }
        if let Ok(pid) = i32::try_from(self.child.id()) {
            let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
        }
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(status) = self.try_wait()? {
                return Ok(status);
            }
            thread::sleep(REAP_POLL);
        }
        let _ = self.child.kill();
        self.wait()
    }

    pub fn terminate(&mut self) -> Result<ExitStatus> {
        self.terminate_with_grace(TERMINATE_GRACE)
    }
}

impl Drop for ExternalProcess {
    fn drop(&mut self) {
        if self.status.is_none() {
            let _ = self.terminate();
        }
    }
}

/// Shell command whose stdout is collected in a scratch file and read back once it exits.
/// Polled from the main loop; the child is killed once `timeout` has passed.
#[derive(Debug)]
pub struct CapturedRun {
    process: ExternalProcess,
    path: PathBuf,
    timeout: Duration,
}

impl CapturedRun {
    pub fn start(command: &str, tag: &str, timeout: Duration) -> Result<Self> {
        let seq = CAPTURE_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "micropanel-{tag}-{}-{seq}.out",
            std::process::id()
        ));
        let process = ExternalProcess::spawn(command, &Output::Stdout(path.clone()))?;
        Ok(Self {
            process,
            path,
            timeout,
        })
    }

    pub fn command(&self) -> &str {
        self.process.command()
    }

    /// `None` while the child runs, then its stdout, or an error once it overran the timeout.
    pub fn poll(&mut self) -> Option<Result<String>> {
        match self.process.try_wait() {
            Ok(Some(_)) => Some(Ok(read_output(&self.path))),
            Ok(None) if self.process.elapsed() >= self.timeout => {
                let _ = self.process.terminate_with_grace(Duration::ZERO);
                Some(Err(Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "'{}' did not finish within {}",
                        self.process.command(),
                        humantime::format_duration(self.timeout)
                    ),
                ))))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl Drop for CapturedRun {
    fn drop(&mut self) {
        if self.process.is_running() {
            let _ = self.process.terminate_with_grace(Duration::ZERO);
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Run a command and capture its stdout, giving up after [`CAPTURE_TIMEOUT`].
pub fn run_capture(command: &str) -> Result<String> {
    run_capture_for(command, CAPTURE_TIMEOUT)
}

pub fn run_capture_for(command: &str, timeout: Duration) -> Result<String> {
    let mut run = CapturedRun::start(command, "capture", timeout)?;
    loop {
        if let Some(result) = run.poll() {
            return result;
        }
        thread::sleep(REAP_POLL);
    }
}

/// Run a command to completion; true when it exited with status 0.
pub fn run_status(command: &str) -> bool {
    Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Read a job's output file, treating a missing file as empty.
pub fn read_output(path: &Path) -> String {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
