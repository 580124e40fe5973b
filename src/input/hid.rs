//! USB-HID rotary encoder (relative axes plus a button) that also accepts keyboard arrows.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::app::Logger;
use crate::Result;

use super::evdev::{
    EvdevDevice, RawEvent, ReadOutcome, BTN_LEFT, EV_KEY, EV_REL, EV_SYN, KEY_DOWN, KEY_ENTER,
    KEY_LEFT, KEY_RIGHT, KEY_UP, REL_X, REL_Y,
};
use super::{poll_readable, InputEvent, InputSource, KEY_ROTATION_STEP};

/// Two rotary reports closer than this are treated as one detent.
pub const PAIR_EXPIRY: Duration = Duration::from_millis(30);
/// A gap longer than this starts a new gesture.
pub const GESTURE_RESET: Duration = Duration::from_millis(100);
pub const MAX_EVENTS_PER_DRAIN: usize = 5;

/// Pure decoding state; time is passed in so behavior is deterministic.
#[derive(Debug, Default, Clone)]
pub struct HidDecoder {
    total_rel_x: i32,
    total_rel_y: i32,
    paired_count: u32,
    last_event: Option<Instant>,
}

impl HidDecoder {
    /// Feed one raw event. Keys produce an event straight away; relative motion accumulates.
    pub fn feed(&mut self, ev: RawEvent, now: Instant) -> Option<InputEvent> {
        match ev.kind {
            EV_SYN => None,
            EV_KEY if ev.value == 1 => match ev.code {
                KEY_LEFT | KEY_UP => Some(InputEvent::Rotate(-KEY_ROTATION_STEP)),
                KEY_RIGHT | KEY_DOWN => Some(InputEvent::Rotate(KEY_ROTATION_STEP)),
                KEY_ENTER | BTN_LEFT => Some(InputEvent::Button),
                _ => None,
            },
            EV_REL if ev.code == REL_X || ev.code == REL_Y => {
                if let Some(last) = self.last_event {
                    if now.saturating_duration_since(last) > GESTURE_RESET {
                        self.reset();
                    }
                }
                self.last_event = Some(now);
                if ev.code == REL_X {
                    self.total_rel_x += ev.value;
                } else {
                    self.total_rel_y += ev.value;
                }
                self.paired_count += 1;
                None
            }
            _ => None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.paired_count > 0
    }

    /// How long until a lone pending report should be delivered.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        if !self.has_pending() {
            return None;
        }
        let last = self.last_event?;
        let elapsed = now.saturating_duration_since(last);
        Some((PAIR_EXPIRY + Duration::from_millis(1)).saturating_sub(elapsed))
    }

    /// Deliver the accumulated rotation once a pair arrived or the partner is overdue.
    pub fn take_due(&mut self, now: Instant) -> Option<InputEvent> {
        if !self.has_pending() {
            return None;
        }
        let expired = self
            .last_event
            .is_some_and(|last| now.saturating_duration_since(last) > PAIR_EXPIRY);
        if self.paired_count < 2 && !expired {
            return None;
        }
        let steps = self.total_rel_x - self.total_rel_y;
        self.reset();
        (steps != 0).then_some(InputEvent::Rotate(steps))
    }

    fn reset(&mut self) {
        self.total_rel_x = 0;
        self.total_rel_y = 0;
        self.paired_count = 0;
    }
}

/// Rotary encoder attached as an evdev node.
pub struct HidEncoder {
    path: PathBuf,
    device: Option<EvdevDevice>,
    decoder: HidDecoder,
    disconnected: bool,
    logger: Logger,
}

impl HidEncoder {
    pub fn open(path: &Path, logger: Logger) -> Result<Self> {
        let device = open_grabbed(path, &logger)?;
        logger.info(format!("input device {} opened", path.display()));
        Ok(Self {
            path: path.to_path_buf(),
            device: Some(device),
            decoder: HidDecoder::default(),
            disconnected: false,
            logger,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reopen(&mut self) -> bool {
        self.device = None;
        match open_grabbed(&self.path, &self.logger) {
            Ok(device) => {
                self.logger
                    .info(format!("reopened input device {}", self.path.display()));
                self.device = Some(device);
                true
            }
            Err(err) => {
                self.logger.warn(format!(
                    "input device {} lost: {err}",
                    self.path.display()
                ));
                self.disconnected = true;
                false
            }
        }
    }
}

fn open_grabbed(path: &Path, logger: &Logger) -> Result<EvdevDevice> {
    let mut device = EvdevDevice::open(path)?;
    if let Err(err) = device.grab() {
        logger.warn(format!(
            "could not grab {} exclusively: {err}",
            path.display()
        ));
    }
    Ok(device)
}

impl InputSource for HidEncoder {
    fn wait(&mut self, timeout: Duration) -> usize {
        let now = Instant::now();
        let timeout = match self.decoder.time_until_due(now) {
            Some(due) if due.is_zero() => return 1,
            Some(due) => timeout.min(due),
            None => timeout,
        };
        let Some(device) = self.device.as_ref() else {
            std::thread::sleep(timeout);
            return 0;
        };
        match poll_readable(&[device], timeout) {
            Ok(ready) if ready.first().copied().unwrap_or(false) => 1,
            Ok(_) => usize::from(
                self.decoder
                    .time_until_due(Instant::now())
                    .is_some_and(|due| due.is_zero()),
            ),
            Err(err) => {
                self.logger.debug(format!("input poll failed: {err}"));
                0
            }
        }
    }

    fn drain(&mut self, handler: &mut dyn FnMut(InputEvent)) {
        let mut consumed = 0;
        let mut reopened = false;
        while consumed < MAX_EVENTS_PER_DRAIN {
            let Some(device) = self.device.as_ref() else {
                break;
            };
            match device.read_event() {
                ReadOutcome::Event(raw) => {
                    if raw.kind == EV_SYN {
                        continue;
                    }
                    consumed += 1;
                    self.logger.trace(format!(
                        "input event type={} code={} value={}",
                        raw.kind, raw.code, raw.value
                    ));
                    if let Some(ev) = self.decoder.feed(raw, Instant::now()) {
                        handler(ev);
                    }
                }
                ReadOutcome::Empty => break,
                ReadOutcome::Gone => {
                    if reopened || !self.reopen() {
                        break;
                    }
                    reopened = true;
                }
            }
        }

        if consumed >= MAX_EVENTS_PER_DRAIN {
            if let Some(device) = self.device.as_ref() {
                while let ReadOutcome::Event(_) = device.read_event() {}
            }
        }

        if let Some(ev) = self.decoder.take_due(Instant::now()) {
            handler(ev);
        }
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}
