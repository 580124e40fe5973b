//! HMI device discovery: sysfs enumeration, kernel uevents and the removal monitor.

use std::fmt;
use std::path::PathBuf;

pub mod detector;
pub mod monitor;
pub mod uevent;

pub(crate) use detector::sleep_while_running;
pub use detector::{DeviceDetector, WaitTiming};
pub use monitor::RemovalMonitor;
pub use uevent::{Uevent, UeventSocket};

pub const HMI_VENDOR_ID: &str = "1209";
pub const HMI_PRODUCT_ID: &str = "0001";
pub const HMI_MANUFACTURER: &str = "DIY Projects";
pub const HMI_PRODUCT_NAME: &str = "Pico Encoder Display";

/// USB identity of the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIds {
    pub vendor: String,
    pub product: String,
    pub manufacturer: String,
    pub product_name: String,
}

impl Default for DeviceIds {
    fn default() -> Self {
        Self {
            vendor: HMI_VENDOR_ID.to_string(),
            product: HMI_PRODUCT_ID.to_string(),
            manufacturer: HMI_MANUFACTURER.to_string(),
            product_name: HMI_PRODUCT_NAME.to_string(),
        }
    }
}

impl DeviceIds {
    /// Compare sysfs-style hex ids (`1209`, `0001`) ignoring case and leading zeros.
    pub fn matches(&self, vendor: &str, product: &str) -> bool {
        hex_eq(&self.vendor, vendor) && hex_eq(&self.product, product)
    }
}

fn hex_eq(a: &str, b: &str) -> bool {
    match (
        u16::from_str_radix(a.trim(), 16),
        u16::from_str_radix(b.trim(), 16),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Resolved device nodes for one panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedDevices {
    pub input: PathBuf,
    pub serial: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    Cancelled,
    GaveUp,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Cancelled => write!(f, "detection cancelled"),
            WaitError::GaveUp => write!(f, "gave up waiting for device"),
        }
    }
}

impl std::error::Error for WaitError {}
