//! Finds the panel's evdev and ttyACM nodes by walking sysfs, with dmesg and
//! "first plausible node" fallbacks.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::app::Logger;
use crate::input::evdev::{list_event_nodes, EvdevDevice};

use super::uevent::UeventSocket;
use super::{DetectedDevices, DeviceIds, WaitError};

const MAX_WALK_DEPTH: usize = 8;
const SLEEP_SLICE: Duration = Duration::from_millis(50);
/// Older firmware announced itself under this shorter name.
const LEGACY_INPUT_NAME: &str = "Pico Encoder";

/// Timing knobs for [`DeviceDetector::wait_for_connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTiming {
    /// Longest single wait on the uevent socket.
    pub poll: Duration,
    /// Pause after a matching `add` before re-checking, so every interface has enumerated.
    pub settle: Duration,
    pub periodic: Duration,
    pub max_attempts: u32,
}

impl Default for WaitTiming {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(1),
            settle: Duration::from_secs(2),
            periodic: Duration::from_secs(5),
            max_attempts: 30,
        }
    }
}

/// Attributes of one `/sys/bus/usb/devices/*` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    pub syspath: PathBuf,
    pub vendor: String,
    pub product: String,
    pub manufacturer: Option<String>,
    pub product_name: Option<String>,
}

impl UsbDevice {
    fn read(syspath: PathBuf) -> Option<Self> {
        let vendor = read_attr(&syspath, "idVendor")?;
        let product = read_attr(&syspath, "idProduct")?;
        Some(Self {
            manufacturer: read_attr(&syspath, "manufacturer"),
            product_name: read_attr(&syspath, "product"),
            syspath,
            vendor,
            product,
        })
    }

    fn names_match(&self, ids: &DeviceIds) -> bool {
        match (&self.manufacturer, &self.product_name) {
            (Some(m), Some(p)) => m.contains(&ids.manufacturer) && p.contains(&ids.product_name),
            _ => false,
        }
    }
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    std::fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_string())
}

#[derive(Debug, Clone)]
pub struct DeviceDetector {
    sys_root: PathBuf,
    dev_root: PathBuf,
    ids: DeviceIds,
    timing: WaitTiming,
    use_dmesg: bool,
    logger: Logger,
}

impl DeviceDetector {
    pub fn new(logger: Logger) -> Self {
        Self {
            sys_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            ids: DeviceIds::default(),
            timing: WaitTiming::default(),
            use_dmesg: true,
            logger,
        }
    }

    /// Point enumeration at alternative sysfs and devfs roots.
    pub fn with_roots(mut self, sys_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        self.sys_root = sys_root.into();
        self.dev_root = dev_root.into();
        self
    }

    pub fn with_ids(mut self, ids: DeviceIds) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_timing(mut self, timing: WaitTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_dmesg(mut self, enabled: bool) -> Self {
        self.use_dmesg = enabled;
        self
    }

    pub fn ids(&self) -> &DeviceIds {
        &self.ids
    }

    pub fn timing(&self) -> WaitTiming {
        self.timing
    }

    /// Every USB device under `bus/usb/devices` that has vendor and product ids.
    pub fn usb_devices(&self) -> Vec<UsbDevice> {
        let dir = self.sys_root.join("bus/usb/devices");
        let mut devices: Vec<UsbDevice> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| UsbDevice::read(e.path()))
                    .collect()
            })
            .unwrap_or_default();
        devices.sort_by(|a, b| a.syspath.cmp(&b.syspath));
        devices
    }

    /// The panel, preferring an id match whose manufacturer and product strings also match.
    pub fn find_usb_device(&self) -> Option<UsbDevice> {
        let mut candidates: Vec<UsbDevice> = self
            .usb_devices()
            .into_iter()
            .filter(|d| self.ids.matches(&d.vendor, &d.product))
            .collect();
        let idx = candidates
            .iter()
            .position(|d| d.names_match(&self.ids))
            .unwrap_or(0);
        (idx < candidates.len()).then(|| candidates.swap_remove(idx))
    }

    pub fn is_present(&self) -> bool {
        self.find_usb_device().is_some()
    }

    /// Resolve both nodes; `None` unless input and serial were both found.
    pub fn detect(&self) -> Option<DetectedDevices> {
        let usb = self.find_usb_device();
        if let Some(dev) = &usb {
            self.logger.info(format!(
                "found device {} {} ({}:{})",
                dev.manufacturer.as_deref().unwrap_or("?"),
                dev.product_name.as_deref().unwrap_or("?"),
                dev.vendor,
                dev.product
            ));
        }
        let input = usb
            .as_ref()
            .and_then(|d| self.input_below(&d.syspath))
            .or_else(|| self.input_from_class_tree())
            .or_else(|| self.dmesg().and_then(|t| input_from_dmesg(&t, &self.ids, &self.dev_root)))
            .or_else(|| self.first_rel_x_node());
        let serial = usb
            .as_ref()
            .and_then(|d| self.serial_below(&d.syspath))
            .or_else(|| self.serial_from_class_tree())
            .or_else(|| self.dmesg().and_then(|t| serial_from_dmesg(&t, &self.ids, &self.dev_root)))
            .or_else(|| self.first_acm_node());
        self.logger.debug(format!(
            "detection: input={:?} serial={:?}",
            input.as_ref().map(|p| p.display().to_string()),
            serial.as_ref().map(|p| p.display().to_string())
        ));
        Some(DetectedDevices {
            input: input?,
            serial: serial?,
        })
    }

    /// Detected nodes when the panel is attached, otherwise the caller's GPIO / I2C pair.
    /// The flag is true for a USB detection.
    pub fn detect_with_fallback(&self, fallback: &DetectedDevices) -> (DetectedDevices, bool) {
        self.logger.info("trying USB HID device detection first");
        match self.detect() {
            Some(found) => {
                self.logger.info(format!(
                    "USB HID device detected: input {} serial {}",
                    found.input.display(),
                    found.serial.display()
                ));
                (found, true)
            }
            None => {
                self.logger.info(format!(
                    "USB HID device not found, falling back to {} / {}",
                    fallback.input.display(),
                    fallback.serial.display()
                ));
                (fallback.clone(), false)
            }
        }
    }

    /// Block until the panel shows up, the running flag clears, or the attempt limit is reached.
    pub fn wait_for_connect(&self, running: &AtomicBool) -> Result<(), WaitError> {
        let socket = match UeventSocket::open() {
            Ok(socket) => Some(socket),
            Err(err) => {
                self.logger
                    .warn(format!("uevent socket unavailable, polling only: {err}"));
                None
            }
        };
        self.logger.info("waiting for HMI device to be connected");
        let mut attempts = 0u32;
        let mut last_periodic = Instant::now();
        while running.load(Ordering::SeqCst) {
            if self.is_present() {
                self.logger.info("HMI device found");
                return Ok(());
            }

            match &socket {
                Some(socket) if socket.wait(self.timing.poll) => {
                    while let Some(ev) = socket.recv_event() {
                        if ev.action != "add" || !ev.matches_ids(&self.ids) {
                            continue;
                        }
                        self.logger
                            .debug(format!("matching USB device added at {}", ev.devpath));
                        sleep_while_running(self.timing.settle, running);
                        if self.is_present() {
                            self.logger.info("HMI device fully initialized");
                            return Ok(());
                        }
                    }
                }
                Some(_) => {}
                None => sleep_while_running(self.timing.poll, running),
            }

            if last_periodic.elapsed() >= self.timing.periodic {
                last_periodic = Instant::now();
                attempts += 1;
                self.logger.debug(format!(
                    "waiting for device... attempt {attempts} of {}",
                    self.timing.max_attempts
                ));
                if self.is_present() {
                    self.logger.info("HMI device found on periodic check");
                    return Ok(());
                }
                if attempts >= self.timing.max_attempts {
                    self.logger.warn(format!(
                        "gave up waiting for device after {attempts} attempts ({})",
                        humantime::format_duration(self.timing.periodic * attempts)
                    ));
                    return Err(WaitError::GaveUp);
                }
            }
        }
        self.logger.info("detection cancelled");
        Err(WaitError::Cancelled)
    }

    fn input_below(&self, usb_dir: &Path) -> Option<PathBuf> {
        descendants(usb_dir)
            .into_iter()
            .find(|dir| is_event_dir(dir) && dir.parent().is_some_and(has_rel_x))
            .and_then(|dir| dir.file_name().map(|n| self.dev_root.join("input").join(n)))
    }

    fn serial_below(&self, usb_dir: &Path) -> Option<PathBuf> {
        descendants(usb_dir)
            .into_iter()
            .find(|dir| is_acm_dir(dir))
            .and_then(|dir| dir.file_name().map(|n| self.dev_root.join(n)))
    }

    fn input_from_class_tree(&self) -> Option<PathBuf> {
        for entry in class_entries(&self.sys_root.join("class/input"), "event") {
            let Ok(real) = entry.canonicalize() else {
                continue;
            };
            let name = real.parent().and_then(|p| read_attr(p, "name"));
            let by_name = name.as_deref().is_some_and(|n| {
                n.contains(&self.ids.product_name) || n.contains(LEGACY_INPUT_NAME)
            });
            if by_name || self.owned_by_panel(&real) {
                return entry.file_name().map(|n| self.dev_root.join("input").join(n));
            }
        }
        None
    }

    fn serial_from_class_tree(&self) -> Option<PathBuf> {
        class_entries(&self.sys_root.join("class/tty"), "ttyACM")
            .into_iter()
            .find(|entry| {
                entry
                    .canonicalize()
                    .is_ok_and(|real| self.owned_by_panel(&real))
            })
            .and_then(|entry| entry.file_name().map(|n| self.dev_root.join(n)))
    }

    /// Walk up from a class device to the owning USB device.
    fn owned_by_panel(&self, real: &Path) -> bool {
        let root = self
            .sys_root
            .canonicalize()
            .unwrap_or_else(|_| self.sys_root.clone());
        real.ancestors()
            .skip(1)
            .take_while(|p| p.starts_with(&root) && *p != root)
            .find_map(|p| Some((read_attr(p, "idVendor")?, read_attr(p, "idProduct")?)))
            .is_some_and(|(vid, pid)| self.ids.matches(&vid, &pid))
    }

    fn dmesg(&self) -> Option<String> {
        if !self.use_dmesg {
            return None;
        }
        let output = Command::new("dmesg").output().ok()?;
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn first_rel_x_node(&self) -> Option<PathBuf> {
        let found = list_event_nodes(&self.dev_root.join("input"))
            .into_iter()
            .find(|path| EvdevDevice::open(path).is_ok_and(|d| d.supports_rel_x()));
        if let Some(path) = &found {
            self.logger.debug(format!(
                "using first REL_X capable input device {}",
                path.display()
            ));
        }
        found
    }

    fn first_acm_node(&self) -> Option<PathBuf> {
        let mut nodes: Vec<PathBuf> = std::fs::read_dir(&self.dev_root)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| file_name_starts_with(p, "ttyACM"))
                    .collect()
            })
            .unwrap_or_default();
        nodes.sort();
        nodes.into_iter().next()
    }
}

/// Sleep in short slices so a cleared running flag cuts the pause short.
pub(crate) fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

fn file_name_starts_with(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(prefix))
}

fn is_event_dir(dir: &Path) -> bool {
    file_name_starts_with(dir, "event")
        && dir
            .parent()
            .is_some_and(|p| file_name_starts_with(p, "input"))
}

fn is_acm_dir(dir: &Path) -> bool {
    file_name_starts_with(dir, "ttyACM")
        && dir
            .parent()
            .and_then(|p| p.file_name())
            .is_some_and(|n| n == "tty")
}

/// `capabilities/rel` is a space separated hex bitmap, most significant word first.
fn has_rel_x(input_dir: &Path) -> bool {
    read_attr(input_dir, "capabilities/rel")
        .and_then(|bits| {
            bits.split_whitespace()
                .last()
                .and_then(|w| u64::from_str_radix(w, 16).ok())
        })
        .is_some_and(|word| word & 1 != 0)
}

/// Real subdirectories below `root`, breadth first, without following symlinks.
fn descendants(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut frontier = vec![root.to_path_buf()];
    for _ in 0..MAX_WALK_DEPTH {
        let mut next = Vec::new();
        for dir in &frontier {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            let mut children: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
                .map(|e| e.path())
                .collect();
            children.sort();
            next.extend(children);
        }
        if next.is_empty() {
            break;
        }
        found.extend(next.iter().cloned());
        frontier = next;
    }
    found
}

fn class_entries(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| file_name_starts_with(p, prefix))
                .collect()
        })
        .unwrap_or_default();
    entries.sort();
    entries
}

/// First `/dev/input/eventN` within two lines of the panel's input announcement.
pub fn input_from_dmesg(text: &str, ids: &DeviceIds, dev_root: &Path) -> Option<PathBuf> {
    let marker = format!("input: {} {} as", ids.manufacturer, ids.product_name);
    let node = Regex::new(r"/dev/input/(event\d+)").ok()?;
    let lines: Vec<&str> = text.lines().collect();
    lines.iter().enumerate().find_map(|(i, line)| {
        if !line.contains(&marker) {
            return None;
        }
        lines[i..lines.len().min(i + 3)]
            .iter()
            .find_map(|l| node.captures(l))
            .map(|caps| dev_root.join("input").join(&caps[1]))
    })
}

/// First `ttyACMN` on the panel's `Product:` line or the line after it.
pub fn serial_from_dmesg(text: &str, ids: &DeviceIds, dev_root: &Path) -> Option<PathBuf> {
    let marker = format!("Product: {}", ids.product_name);
    let node = Regex::new(r"(?:/dev/)?(ttyACM\d+)").ok()?;
    let lines: Vec<&str> = text.lines().collect();
    lines.iter().enumerate().find_map(|(i, line)| {
        if !line.contains(&marker) {
            return None;
        }
        lines[i..lines.len().min(i + 2)]
            .iter()
            .find_map(|l| node.captures(l))
            .map(|caps| dev_root.join(&caps[1]))
    })
}
