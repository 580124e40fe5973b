//! Owns the panel devices and the menu engine, and runs the cooperative main loop.
//!
//! One [`Session`] covers one connection. When the panel goes away the engine is suspended, the
//! devices are dropped, and the supervisor blocks on hotplug until it can open a fresh session.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{MenuLayout, ModuleDependencies, GPIO_INPUT, I2C_PREFIX};
use crate::device::{
    sleep_while_running, DetectedDevices, DeviceDetector, RemovalMonitor, WaitError,
};
use crate::display::{Display, DisplayBackend, SerialFrameBackend};
use crate::input::{HidEncoder, InputSource, MultiGpio};
use crate::menu::{MenuEngine, ModuleContext};
use crate::modules::{brightness, root_menu, BuiltinFactory};
use crate::serial::open_display_port;
use crate::storage::PersistentStore;
use crate::{Error, Result};

use super::{lifecycle, AppConfig, Logger};

pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(50);
const TICK_SLEEP: Duration = Duration::from_millis(5);
const INPUT_DIR: &str = "/dev/input";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The running flag cleared.
    Shutdown,
    /// The panel was unplugged or stopped answering.
    Disconnected,
}

/// Devices opened for one connection.
pub struct Session {
    pub input: Box<dyn InputSource>,
    pub display: Display,
    monitor: Option<RemovalMonitor>,
}

impl Session {
    pub fn new(input: Box<dyn InputSource>, display: Display) -> Self {
        Self {
            input,
            display,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: RemovalMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// I2C panels are wired to the host, so only a serial link counts as lost.
    fn is_lost(&self) -> bool {
        self.monitor.as_ref().is_some_and(|m| m.is_removed())
            || self.input.is_disconnected()
            || (!self.display.is_i2c() && self.display.is_disconnected())
    }

    fn stop_monitor(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
    }
}

pub struct Supervisor {
    config: AppConfig,
    detector: DeviceDetector,
    deps: ModuleDependencies,
    storage: PersistentStore,
    engine: MenuEngine,
    logger: Logger,
}

impl Supervisor {
    pub fn new(config: AppConfig, layout: MenuLayout, logger: Logger) -> Self {
        let deps = ModuleDependencies::from_layout(&layout, &logger);
        let storage = match &config.persistent_file {
            Some(path) => PersistentStore::open(path, logger.clone()),
            None => PersistentStore::in_memory(logger.clone()),
        };
        let engine = MenuEngine::new(
            Box::new(root_menu(&layout)),
            Box::new(BuiltinFactory::new(layout)),
            logger.clone(),
        );
        Self {
            config,
            detector: DeviceDetector::new(logger.clone()),
            deps,
            storage,
            engine,
            logger,
        }
    }

    /// Replace the detector, e.g. to point it at another sysfs tree.
    pub fn with_detector(mut self, detector: DeviceDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn engine(&self) -> &MenuEngine {
        &self.engine
    }

    pub fn storage(&self) -> &PersistentStore {
        &self.storage
    }

    /// Run sessions until the running flag clears. Persisted state is saved on the way out.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        let mut reconnecting = false;
        let outcome = loop {
            let mut session = match self.connect(running, reconnecting) {
                Ok(Some(session)) => session,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            };
            let end = self.run_session(&mut session, running);
            self.close_session(session, end);
            if end == SessionEnd::Shutdown {
                break Ok(());
            }
            reconnecting = true;
        };
        if let Err(err) = self.storage.save() {
            self.logger.warn(format!("final save failed: {err}"));
        }
        outcome
    }

    /// Open devices, waiting on hotplug when they are missing. `None` means shutdown was requested.
    /// Failed opens pause for the settle time and count toward the attempt limit, since the
    /// panel may stay enumerated while its nodes cannot be opened.
    fn connect(&mut self, running: &AtomicBool, reconnecting: bool) -> Result<Option<Session>> {
        let mut wait_first = reconnecting;
        let mut failed_opens = 0u32;
        loop {
            if !running.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if wait_first {
                self.logger.info("waiting for the panel to connect");
                match self.detector.wait_for_connect(running) {
                    Ok(()) => {}
                    Err(WaitError::Cancelled) => return Ok(None),
                    Err(err @ WaitError::GaveUp) => return Err(Error::Device(err.to_string())),
                }
            }
            match self.open_session() {
                Ok(session) => return Ok(Some(session)),
                Err(err) if self.config.auto_detect || reconnecting => {
                    let timing = self.detector.timing();
                    failed_opens += 1;
                    self.logger.warn(format!(
                        "failed to open panel devices (attempt {failed_opens} of {}): {err}",
                        timing.max_attempts
                    ));
                    if failed_opens >= timing.max_attempts {
                        return Err(Error::Device(format!(
                            "panel devices could not be opened after {failed_opens} attempts: {err}"
                        )));
                    }
                    sleep_while_running(timing.settle, running);
                    wait_first = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn open_session(&mut self) -> Result<Session> {
        let fallback = DetectedDevices {
            input: PathBuf::from(&self.config.input),
            serial: PathBuf::from(&self.config.serial),
        };
        let (paths, usb) = if self.config.auto_detect {
            self.detector.detect_with_fallback(&fallback)
        } else {
            (fallback, false)
        };
        let display = self.open_display(&paths.serial)?;
        let input = open_input(&paths.input, &self.logger)?;
        let mut session = Session::new(input, display);
        if usb && !session.display.is_i2c() {
            match RemovalMonitor::start(self.detector.clone(), self.logger.clone()) {
                Ok(monitor) => session = session.with_monitor(monitor),
                Err(err) => self
                    .logger
                    .warn(format!("removal monitor unavailable: {err}")),
            }
        }
        Ok(session)
    }

    fn open_display(&self, serial: &Path) -> Result<Display> {
        let path = serial.to_string_lossy();
        let backend: Box<dyn DisplayBackend> = if path.starts_with(I2C_PREFIX) {
            open_i2c(&path, &self.logger)?
        } else {
            let port = open_display_port(&path)?;
            self.logger.info(format!("display port {path} opened"));
            Box::new(SerialFrameBackend::new(port, self.logger.clone()))
        };
        let mut display = Display::new(backend);
        brightness::restore(&mut display, &self.storage);
        display.enable_power_save(self.config.power_save);
        Ok(display)
    }

    /// Drive one connection until shutdown or disconnect.
    pub fn run_session(&mut self, session: &mut Session, running: &AtomicBool) -> SessionEnd {
        {
            let mut ctx = ModuleContext::new(
                &mut session.display,
                &self.deps,
                &mut self.storage,
                &self.logger,
            );
            self.engine.start(&mut ctx);
        }
        let mut last_flush = Instant::now();
        let mut events = Vec::new();

        while running.load(Ordering::SeqCst) {
            if session.is_lost() {
                self.logger.warn("panel disconnected");
                return SessionEnd::Disconnected;
            }

            if session.input.wait(POLL_TIMEOUT) > 0 {
                session.input.drain(&mut |ev| events.push(ev));
            }
            {
                let mut ctx = ModuleContext::new(
                    &mut session.display,
                    &self.deps,
                    &mut self.storage,
                    &self.logger,
                );
                for event in events.drain(..) {
                    ctx.display.update_activity_timestamp();
                    self.engine.route(event, &mut ctx);
                }
                self.engine.update(&mut ctx);
            }

            if self.config.power_save && session.display.check_power_save_timeout() {
                self.logger.debug("display idle, powering off");
            }
            if !session.display.is_i2c() && last_flush.elapsed() >= FLUSH_INTERVAL {
                session.display.flush_buffer();
                last_flush = Instant::now();
            }
            if let Err(err) = self.storage.flush_due(Instant::now()) {
                self.logger.warn(format!("saving module state failed: {err}"));
            }
            thread::sleep(TICK_SLEEP);
        }
        SessionEnd::Shutdown
    }

    /// Tear a session down. A disconnect unwinds the menu to root so the next session starts
    /// clean; a shutdown also stops parked modules and leaves the shutdown message up.
    pub fn close_session(&mut self, mut session: Session, end: SessionEnd) {
        session.stop_monitor();
        {
            let mut ctx = ModuleContext::new(
                &mut session.display,
                &self.deps,
                &mut self.storage,
                &self.logger,
            );
            match end {
                SessionEnd::Disconnected => self.engine.suspend(&mut ctx),
                SessionEnd::Shutdown => self.engine.shutdown(&mut ctx),
            }
        }
        if end == SessionEnd::Shutdown {
            lifecycle::render_shutdown(&mut session.display);
        }
        session.display.close();
        self.logger.debug(format!("session closed ({end:?})"));
    }
}

fn open_input(path: &Path, logger: &Logger) -> Result<Box<dyn InputSource>> {
    if path == Path::new(GPIO_INPUT) {
        return Ok(Box::new(MultiGpio::scan(Path::new(INPUT_DIR), logger.clone())?));
    }
    Ok(Box::new(HidEncoder::open(path, logger.clone())?))
}

#[cfg(target_os = "linux")]
fn open_i2c(path: &str, logger: &Logger) -> Result<Box<dyn DisplayBackend>> {
    Ok(Box::new(crate::display::I2cSsd1306Backend::open(
        path, logger,
    )?))
}

#[cfg(not(target_os = "linux"))]
fn open_i2c(path: &str, _logger: &Logger) -> Result<Box<dyn DisplayBackend>> {
    Err(Error::Device(format!("{path}: I2C displays need Linux")))
}
