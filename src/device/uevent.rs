//! Kernel hotplug events over `NETLINK_KOBJECT_UEVENT`.

use std::collections::HashMap;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{
    bind, recv, socket, AddressFamily, MsgFlags, NetlinkAddr, SockFlag, SockProtocol, SockType,
};

use crate::input::poll_readable;
use crate::Result;

use super::DeviceIds;

const KERNEL_GROUP: u32 = 1;
const RECV_BUF_LEN: usize = 8192;

/// One parsed uevent datagram.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uevent {
    pub action: String,
    pub devpath: String,
    pub vars: HashMap<String, String>,
}

impl Uevent {
    /// Parse `action@devpath\0KEY=VALUE\0...`. Messages re-broadcast by udevd carry a
    /// binary `libudev` header and are ignored.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let mut parts = buf.split(|b| *b == 0).filter(|p| !p.is_empty());
        let header = std::str::from_utf8(parts.next()?).ok()?;
        if header.starts_with("libudev") {
            return None;
        }
        let (action, devpath) = header.split_once('@')?;
        let vars = parts
            .filter_map(|p| std::str::from_utf8(p).ok())
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        Some(Self {
            action: vars.get("ACTION").cloned().unwrap_or_else(|| action.to_string()),
            devpath: devpath.to_string(),
            vars,
        })
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn is_usb_device(&self) -> bool {
        self.var("SUBSYSTEM") == Some("usb") && self.var("DEVTYPE") == Some("usb_device")
    }

    /// `PRODUCT` is `vendor/product/bcdDevice` in unpadded hex.
    pub fn matches_ids(&self, ids: &DeviceIds) -> bool {
        if !self.is_usb_device() {
            return false;
        }
        let Some(product) = self.var("PRODUCT") else {
            return false;
        };
        let mut fields = product.split('/');
        match (fields.next(), fields.next()) {
            (Some(vid), Some(pid)) => ids.matches(vid, pid),
            _ => false,
        }
    }
}

/// Non-blocking netlink socket bound to the kernel uevent multicast group.
#[derive(Debug)]
pub struct UeventSocket {
    fd: OwnedFd,
}

impl UeventSocket {
    pub fn open() -> Result<Self> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            SockProtocol::NetlinkKObjectUEvent,
        )?;
        bind(fd.as_raw_fd(), &NetlinkAddr::new(0, KERNEL_GROUP))?;
        Ok(Self { fd })
    }

    /// Wait up to `timeout` for a datagram.
    pub fn wait(&self, timeout: Duration) -> bool {
        poll_readable(&[self], timeout)
            .map(|ready| ready.first().copied().unwrap_or(false))
            .unwrap_or(false)
    }

    /// Next queued event, skipping anything unparsable.
    pub fn recv_event(&self) -> Option<Uevent> {
        let mut buf = [0u8; RECV_BUF_LEN];
        loop {
            match recv(self.fd.as_raw_fd(), &mut buf, MsgFlags::MSG_DONTWAIT) {
                Ok(0) => return None,
                Ok(n) => {
                    if let Some(ev) = Uevent::parse(&buf[..n]) {
                        return Some(ev);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl AsFd for UeventSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(parts: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        for p in parts {
            buf.extend_from_slice(p.as_bytes());
            buf.push(0);
        }
        buf
    }

    #[test]
    fn parses_kernel_add_event() {
        let buf = datagram(&[
            "add@/devices/platform/usb1/1-1",
            "ACTION=add",
            "DEVPATH=/devices/platform/usb1/1-1",
            "SUBSYSTEM=usb",
            "DEVTYPE=usb_device",
            "PRODUCT=1209/1/100",
        ]);
        let ev = Uevent::parse(&buf).unwrap();
        assert_eq!(ev.action, "add");
        assert_eq!(ev.devpath, "/devices/platform/usb1/1-1");
        assert!(ev.is_usb_device());
        assert!(ev.matches_ids(&DeviceIds::default()));
    }

    #[test]
    fn interface_events_do_not_match() {
        let buf = datagram(&[
            "remove@/devices/platform/usb1/1-1/1-1:1.0",
            "ACTION=remove",
            "SUBSYSTEM=usb",
            "DEVTYPE=usb_interface",
            "PRODUCT=1209/1/100",
        ]);
        let ev = Uevent::parse(&buf).unwrap();
        assert_eq!(ev.action, "remove");
        assert!(!ev.matches_ids(&DeviceIds::default()));
    }

    #[test]
    fn libudev_and_garbage_are_ignored() {
        assert!(Uevent::parse(b"libudev\0\xfe\xed").is_none());
        assert!(Uevent::parse(b"no-at-sign\0A=B\0").is_none());
        assert!(Uevent::parse(b"").is_none());
    }
}
