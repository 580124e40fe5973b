//! Background watch for the panel being unplugged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::app::Logger;
use crate::{Error, Result};

use super::uevent::UeventSocket;
use super::DeviceDetector;

pub const PRESENCE_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const SOCKET_WAIT: Duration = Duration::from_millis(200);
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to the monitor thread. Dropping it stops the thread.
pub struct RemovalMonitor {
    removed: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    join: Option<JoinHandle<()>>,
    logger: Logger,
}

impl RemovalMonitor {
    pub fn start(detector: DeviceDetector, logger: Logger) -> Result<Self> {
        Self::start_with_interval(detector, logger, PRESENCE_CHECK_INTERVAL)
    }

    pub fn start_with_interval(
        detector: DeviceDetector,
        logger: Logger,
        interval: Duration,
    ) -> Result<Self> {
        let removed = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        let flag = removed.clone();
        let thread_logger = logger.clone();
        let join = thread::Builder::new()
            .name("micropanel-monitor".into())
            .spawn(move || {
                watch(&detector, &flag, &stop_rx, interval, &thread_logger);
                let _ = done_tx.send(());
            })
            .map_err(Error::Io)?;
        logger.debug("removal monitor started");
        Ok(Self {
            removed,
            stop_tx: Some(stop_tx),
            done_rx,
            join: Some(join),
            logger,
        })
    }

    /// True once the panel was seen leaving.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    /// Signal the thread and wait a bounded time for it to finish.
    pub fn stop(&mut self) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        let _ = stop_tx.send(());
        drop(stop_tx);
        let Some(join) = self.join.take() else {
            return;
        };
        match self.done_rx.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = join.join();
                self.logger.debug("removal monitor stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                self.logger
                    .warn("removal monitor did not stop in time, detaching");
            }
        }
    }
}

impl Drop for RemovalMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    !matches!(stop_rx.try_recv(), Err(channel::TryRecvError::Empty))
}

fn watch(
    detector: &DeviceDetector,
    removed: &AtomicBool,
    stop_rx: &Receiver<()>,
    interval: Duration,
    logger: &Logger,
) {
    let socket = UeventSocket::open()
        .map_err(|err| logger.debug(format!("monitor without uevents: {err}")))
        .ok();
    let mut last_check = Instant::now();
    loop {
        if last_check.elapsed() >= interval {
            last_check = Instant::now();
            if !detector.is_present() {
                logger.info("HMI device no longer present");
                removed.store(true, Ordering::SeqCst);
                return;
            }
        }

        match &socket {
            Some(socket) => {
                if socket.wait(SOCKET_WAIT.min(interval)) {
                    while let Some(ev) = socket.recv_event() {
                        if ev.action == "remove" && ev.matches_ids(detector.ids()) {
                            logger.info(format!("HMI device removed ({})", ev.devpath));
                            removed.store(true, Ordering::SeqCst);
                            return;
                        }
                    }
                }
                if stop_requested(stop_rx) {
                    return;
                }
            }
            None => match stop_rx.recv_timeout(interval.saturating_sub(last_check.elapsed())) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            },
        }
    }
}
