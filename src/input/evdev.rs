//! Thin evdev layer: raw event decoding, device handles and the ioctls we need.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};

use rustix::fs::{Mode, OFlags};
use rustix::io::Errno;

use crate::{Error, Result};

pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;

pub const REL_X: u16 = 0x00;
pub const REL_Y: u16 = 0x01;

pub const KEY_ENTER: u16 = 28;
pub const KEY_UP: u16 = 103;
pub const KEY_LEFT: u16 = 105;
pub const KEY_RIGHT: u16 = 106;
pub const KEY_DOWN: u16 = 108;
pub const BTN_LEFT: u16 = 0x110;

/// `struct input_event` is a timeval followed by type/code/value; the timeval is two C longs.
pub const EVENT_SIZE: usize = 2 * std::mem::size_of::<std::ffi::c_long>() + 8;

const KEY_BITS_LEN: usize = (0x2ff / 8) + 1;
const NAME_LEN: usize = 256;

nix::ioctl_write_int!(eviocgrab, b'E', 0x90);
nix::ioctl_read_buf!(eviocgname, b'E', 0x06, u8);
nix::ioctl_read_buf!(eviocgbit_key, b'E', 0x21, u8);
nix::ioctl_read_buf!(eviocgbit_rel, b'E', 0x22, u8);

/// Decoded `input_event` without its timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    /// Decode from one native-endian record; the payload sits in the trailing 8 bytes.
    pub fn decode(record: &[u8]) -> Option<Self> {
        if record.len() < 8 {
            return None;
        }
        let tail = &record[record.len() - 8..];
        Some(Self {
            kind: u16::from_ne_bytes([tail[0], tail[1]]),
            code: u16::from_ne_bytes([tail[2], tail[3]]),
            value: i32::from_ne_bytes([tail[4], tail[5], tail[6], tail[7]]),
        })
    }

    /// Build a full-size record; used by tests and fakes.
    pub fn encode(&self) -> Vec<u8> {
        let mut record = vec![0u8; EVENT_SIZE - 8];
        record.extend_from_slice(&self.kind.to_ne_bytes());
        record.extend_from_slice(&self.code.to_ne_bytes());
        record.extend_from_slice(&self.value.to_ne_bytes());
        record
    }
}

/// Result of a single non-blocking read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Event(RawEvent),
    Empty,
    /// EIO, ENODEV or ENXIO: the device node is gone.
    Gone,
}

fn is_gone(errno: Errno) -> bool {
    errno == Errno::IO || errno == Errno::NODEV || errno == Errno::NXIO
}

/// Open evdev node. An exclusive grab, when taken, is released on drop.
#[derive(Debug)]
pub struct EvdevDevice {
    fd: OwnedFd,
    path: PathBuf,
    grabbed: bool,
}

impl EvdevDevice {
    pub fn open(path: &Path) -> Result<Self> {
        let fd = rustix::fs::open(
            path,
            OFlags::RDONLY | OFlags::NONBLOCK | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| Error::Io(e.into()))?;
        Ok(Self {
            fd,
            path: path.to_path_buf(),
            grabbed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn grab(&mut self) -> Result<()> {
        // SAFETY: the descriptor is owned by self and EVIOCGRAB takes an int by value.
        unsafe { eviocgrab(self.fd.as_raw_fd(), 1) }?;
        self.grabbed = true;
        Ok(())
    }

    pub fn name(&self) -> Option<String> {
        let mut buf = [0u8; NAME_LEN];
        // SAFETY: the kernel writes at most buf.len() bytes.
        let len = unsafe { eviocgname(self.fd.as_raw_fd(), &mut buf) }.ok()?;
        let len = usize::try_from(len).ok()?.min(NAME_LEN);
        let raw = &buf[..len];
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        Some(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    pub fn supports_key(&self, code: u16) -> bool {
        let mut bits = [0u8; KEY_BITS_LEN];
        // SAFETY: the kernel writes at most bits.len() bytes.
        if unsafe { eviocgbit_key(self.fd.as_raw_fd(), &mut bits) }.is_err() {
            return false;
        }
        bit_set(&bits, code)
    }

    pub fn supports_rel_x(&self) -> bool {
        let mut bits = [0u8; 2];
        // SAFETY: the kernel writes at most bits.len() bytes.
        if unsafe { eviocgbit_rel(self.fd.as_raw_fd(), &mut bits) }.is_err() {
            return false;
        }
        bit_set(&bits, REL_X)
    }

    /// Read one event without blocking.
    pub fn read_event(&self) -> ReadOutcome {
        let mut record = [0u8; EVENT_SIZE];
        match rustix::io::read(&self.fd, &mut record[..]) {
            Ok(n) if n == EVENT_SIZE => match RawEvent::decode(&record) {
                Some(ev) => ReadOutcome::Event(ev),
                None => ReadOutcome::Empty,
            },
            Ok(_) => ReadOutcome::Empty,
            Err(errno) if is_gone(errno) => ReadOutcome::Gone,
            Err(_) => ReadOutcome::Empty,
        }
    }
}

impl AsFd for EvdevDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for EvdevDevice {
    fn drop(&mut self) {
        if self.grabbed {
            // SAFETY: descriptor still open; releasing a grab has no memory effects.
            let _ = unsafe { eviocgrab(self.fd.as_raw_fd(), 0) };
        }
    }
}

fn bit_set(bits: &[u8], bit: u16) -> bool {
    let idx = usize::from(bit / 8);
    idx < bits.len() && bits[idx] & (1 << (bit % 8)) != 0
}

/// Sorted `/dev/input/event*` style paths under `dir`.
pub fn list_event_nodes(dir: &Path) -> Vec<PathBuf> {
    let mut nodes: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("event"))
                })
                .collect()
        })
        .unwrap_or_default();
    nodes.sort_by_key(|p| event_index(p));
    nodes
}

fn event_index(path: &Path) -> (u32, String) {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let idx = name
        .trim_start_matches("event")
        .parse::<u32>()
        .unwrap_or(u32::MAX);
    (idx, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reads_trailing_payload() {
        let ev = RawEvent {
            kind: EV_REL,
            code: REL_X,
            value: -3,
        };
        let record = ev.encode();
        assert_eq!(record.len(), EVENT_SIZE);
        assert_eq!(RawEvent::decode(&record), Some(ev));
        assert_eq!(RawEvent::decode(&[0u8; 4]), None);
    }

    #[test]
    fn bit_lookup_handles_bounds() {
        let mut bits = [0u8; KEY_BITS_LEN];
        bits[usize::from(KEY_ENTER / 8)] |= 1 << (KEY_ENTER % 8);
        assert!(bit_set(&bits, KEY_ENTER));
        assert!(!bit_set(&bits, KEY_UP));
        assert!(!bit_set(&[0u8; 1], 0x200));
    }

    #[test]
    fn event_nodes_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["event10", "event2", "mouse0", "event0"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = list_event_nodes(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["event0", "event2", "event10"]);
    }

    #[test]
    fn regular_file_reads_as_event_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event0");
        let ev = RawEvent {
            kind: EV_KEY,
            code: KEY_ENTER,
            value: 1,
        };
        std::fs::write(&path, ev.encode()).unwrap();
        let dev = EvdevDevice::open(&path).unwrap();
        assert_eq!(dev.read_event(), ReadOutcome::Event(ev));
        assert_eq!(dev.read_event(), ReadOutcome::Empty);
        assert!(dev.name().is_none());
    }
}
