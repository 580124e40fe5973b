//! Several gpio-keys / rotary-encoder evdev nodes polled together.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::Logger;
use crate::{Error, Result};

use super::evdev::{
    list_event_nodes, EvdevDevice, RawEvent, ReadOutcome, EV_KEY, EV_REL, KEY_DOWN, KEY_ENTER,
    KEY_LEFT, KEY_RIGHT, KEY_UP, REL_X,
};
use super::{poll_readable, InputEvent, InputSource, KEY_ROTATION_STEP};

/// Probe order when a button node advertises several keys.
const KEY_PROBE_ORDER: [u16; 5] = [KEY_LEFT, KEY_RIGHT, KEY_UP, KEY_DOWN, KEY_ENTER];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioKind {
    Button { keycode: u16 },
    RotaryEncoder,
}

impl GpioKind {
    /// Translate one raw event from a node of this kind.
    pub fn translate(&self, ev: RawEvent) -> Option<InputEvent> {
        match self {
            GpioKind::RotaryEncoder if ev.kind == EV_REL && ev.code == REL_X => {
                Some(InputEvent::Rotate(ev.value * KEY_ROTATION_STEP))
            }
            GpioKind::Button { keycode }
                if ev.kind == EV_KEY && ev.value == 1 && ev.code == *keycode =>
            {
                match ev.code {
                    KEY_LEFT | KEY_UP => Some(InputEvent::Rotate(-KEY_ROTATION_STEP)),
                    KEY_RIGHT | KEY_DOWN => Some(InputEvent::Rotate(KEY_ROTATION_STEP)),
                    KEY_ENTER => Some(InputEvent::Button),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Which overlay created an input node; buttons still need their key probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioNodeKind {
    Rotary,
    Button,
}

/// Device-tree node names used by the gpio-keys and rotary-encoder overlays.
pub fn kind_from_name(name: &str) -> Option<GpioNodeKind> {
    if name.starts_with("rotary@") {
        Some(GpioNodeKind::Rotary)
    } else if name.starts_with("button@") {
        Some(GpioNodeKind::Button)
    } else {
        None
    }
}

#[derive(Debug)]
pub struct GpioDevice {
    path: PathBuf,
    kind: GpioKind,
    handle: Option<EvdevDevice>,
}

impl GpioDevice {
    pub fn new(path: PathBuf, kind: GpioKind, handle: Option<EvdevDevice>) -> Self {
        Self { path, kind, handle }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn kind(&self) -> GpioKind {
        self.kind
    }
}

/// Aggregates every GPIO input node into one source.
pub struct MultiGpio {
    devices: Vec<GpioDevice>,
    ready: Vec<bool>,
    logger: Logger,
}

impl MultiGpio {
    /// Scan `dir` (normally `/dev/input`) for `button@*` and `rotary@*` nodes and open them.
    pub fn scan(dir: &Path, logger: Logger) -> Result<Self> {
        let mut devices = Vec::new();
        for path in list_event_nodes(dir) {
            let Ok(mut handle) = EvdevDevice::open(&path) else {
                continue;
            };
            let Some(name) = handle.name() else {
                continue;
            };
            let kind = match kind_from_name(&name) {
                Some(GpioNodeKind::Rotary) => GpioKind::RotaryEncoder,
                Some(GpioNodeKind::Button) => {
                    let Some(keycode) = KEY_PROBE_ORDER
                        .iter()
                        .copied()
                        .find(|code| handle.supports_key(*code))
                    else {
                        logger.warn(format!("{name} advertises no navigation key, skipping"));
                        continue;
                    };
                    GpioKind::Button { keycode }
                }
                None => continue,
            };
            if let Err(err) = handle.grab() {
                logger.warn(format!(
                    "could not grab {} exclusively: {err}",
                    path.display()
                ));
            }
            logger.info(format!("gpio input {} ({name}) as {kind:?}", path.display()));
            devices.push(GpioDevice::new(path, kind, Some(handle)));
        }
        if devices.is_empty() {
            return Err(Error::Device(format!(
                "no gpio input devices found under {}",
                dir.display()
            )));
        }
        Ok(Self::from_devices(devices, logger))
    }

    pub fn from_devices(mut devices: Vec<GpioDevice>, logger: Logger) -> Self {
        devices.sort_by(|a, b| a.path.cmp(&b.path));
        let ready = vec![false; devices.len()];
        Self {
            devices,
            ready,
            logger,
        }
    }

    pub fn devices(&self) -> &[GpioDevice] {
        &self.devices
    }

    fn drain_device(
        device: &mut GpioDevice,
        logger: &Logger,
        handler: &mut dyn FnMut(InputEvent),
    ) {
        loop {
            let Some(handle) = device.handle.as_ref() else {
                return;
            };
            match handle.read_event() {
                ReadOutcome::Event(raw) => {
                    if let Some(ev) = device.kind.translate(raw) {
                        handler(ev);
                    }
                }
                ReadOutcome::Empty => return,
                ReadOutcome::Gone => {
                    logger.warn(format!("gpio input {} went away", device.path.display()));
                    device.handle = None;
                    return;
                }
            }
        }
    }
}

impl InputSource for MultiGpio {
    fn wait(&mut self, timeout: Duration) -> usize {
        let open: Vec<(usize, &EvdevDevice)> = self
            .devices
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.handle.as_ref().map(|h| (i, h)))
            .collect();
        let handles: Vec<&EvdevDevice> = open.iter().map(|(_, h)| *h).collect();
        self.ready.iter_mut().for_each(|r| *r = false);
        match poll_readable(&handles, timeout) {
            Ok(flags) => {
                let mut count = 0;
                for ((idx, _), flag) in open.iter().zip(flags) {
                    if flag {
                        self.ready[*idx] = true;
                        count += 1;
                    }
                }
                count
            }
            Err(err) => {
                self.logger.debug(format!("gpio poll failed: {err}"));
                0
            }
        }
    }

    fn drain(&mut self, handler: &mut dyn FnMut(InputEvent)) {
        let any_ready = self.ready.iter().any(|r| *r);
        for (idx, device) in self.devices.iter_mut().enumerate() {
            if any_ready && !self.ready[idx] {
                continue;
            }
            Self::drain_device(device, &self.logger, handler);
        }
        self.ready.iter_mut().for_each(|r| *r = false);
    }

    fn is_disconnected(&self) -> bool {
        !self.devices.iter().any(|d| d.is_open())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: u16, value: i32) -> RawEvent {
        RawEvent {
            kind: EV_KEY,
            code,
            value,
        }
    }

    #[test]
    fn names_select_device_kind() {
        assert_eq!(kind_from_name("rotary@4"), Some(GpioNodeKind::Rotary));
        assert_eq!(kind_from_name("button@17"), Some(GpioNodeKind::Button));
        assert_eq!(kind_from_name("USB Keyboard"), None);
    }

    #[test]
    fn buttons_only_answer_to_their_keycode() {
        let left = GpioKind::Button { keycode: KEY_LEFT };
        assert_eq!(left.translate(key(KEY_LEFT, 1)), Some(InputEvent::Rotate(-5)));
        assert_eq!(left.translate(key(KEY_LEFT, 0)), None);
        assert_eq!(left.translate(key(KEY_RIGHT, 1)), None);

        let enter = GpioKind::Button { keycode: KEY_ENTER };
        assert_eq!(enter.translate(key(KEY_ENTER, 1)), Some(InputEvent::Button));
        let down = GpioKind::Button { keycode: KEY_DOWN };
        assert_eq!(down.translate(key(KEY_DOWN, 1)), Some(InputEvent::Rotate(5)));
    }

    #[test]
    fn rotary_scales_relative_steps() {
        let rotary = GpioKind::RotaryEncoder;
        let ev = RawEvent {
            kind: EV_REL,
            code: REL_X,
            value: -2,
        };
        assert_eq!(rotary.translate(ev), Some(InputEvent::Rotate(-10)));
    }

    #[test]
    fn drains_devices_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        let b_path = dir.path().join("event1");
        let a_path = dir.path().join("event0");
        std::fs::write(&a_path, key(KEY_ENTER, 1).encode()).unwrap();
        std::fs::write(&b_path, key(KEY_UP, 1).encode()).unwrap();

        let devices = vec![
            GpioDevice::new(
                b_path.clone(),
                GpioKind::Button { keycode: KEY_UP },
                Some(EvdevDevice::open(&b_path).unwrap()),
            ),
            GpioDevice::new(
                a_path.clone(),
                GpioKind::Button { keycode: KEY_ENTER },
                Some(EvdevDevice::open(&a_path).unwrap()),
            ),
            GpioDevice::new(dir.path().join("event9"), GpioKind::RotaryEncoder, None),
        ];
        let mut gpio = MultiGpio::from_devices(devices, Logger::silent());
        assert_eq!(gpio.wait(Duration::from_millis(1)), 2);
        let mut seen = Vec::new();
        gpio.drain(&mut |ev| seen.push(ev));
        assert_eq!(seen, vec![InputEvent::Button, InputEvent::Rotate(-5)]);
        assert!(!gpio.is_disconnected());
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MultiGpio::scan(dir.path(), Logger::silent()).is_err());
    }
}
