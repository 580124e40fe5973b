use rustix::io::Errno;
use std::io::ErrorKind;

/// High-level reason for a device transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFailureKind {
    PermissionDenied,
    DeviceMissing,
    Disconnected,
    Timeout,
    Busy,
    Unknown,
}

impl DeviceFailureKind {
    /// EIO, ENODEV and ENXIO mean the device went away underneath us.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            DeviceFailureKind::Disconnected | DeviceFailureKind::DeviceMissing
        )
    }
}

/// Classify an std::io::Error into a failure reason.
pub fn classify_io_error(err: &std::io::Error) -> DeviceFailureKind {
    if let Some(errno) = Errno::from_io_error(err) {
        return classify_errno(errno);
    }
    match err.kind() {
        ErrorKind::PermissionDenied => DeviceFailureKind::PermissionDenied,
        ErrorKind::NotFound => DeviceFailureKind::DeviceMissing,
        ErrorKind::TimedOut | ErrorKind::WouldBlock => DeviceFailureKind::Timeout,
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            DeviceFailureKind::Disconnected
        }
        _ => DeviceFailureKind::Unknown,
    }
}

fn classify_errno(errno: Errno) -> DeviceFailureKind {
    if errno == Errno::IO {
        DeviceFailureKind::Disconnected
    } else if errno == Errno::NXIO || errno == Errno::NODEV {
        DeviceFailureKind::DeviceMissing
    } else if errno == Errno::ACCESS {
        DeviceFailureKind::PermissionDenied
    } else if errno == Errno::BUSY {
        DeviceFailureKind::Busy
    } else if errno == Errno::TIMEDOUT || errno == Errno::AGAIN {
        DeviceFailureKind::Timeout
    } else {
        DeviceFailureKind::Unknown
    }
}
