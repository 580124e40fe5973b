use crate::{Error, Result};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};
use std::io;
use std::time::Duration;

pub const DISPLAY_BAUD: u32 = 115_200;
const WRITE_TIMEOUT_MS: u64 = 500;

/// Open the display link at 115200-8N1, raw, no flow control, with stale data discarded.
pub fn open_display_port(device: &str) -> Result<Box<dyn serialport::SerialPort>> {
    if device.is_empty() {
        return Err(Error::InvalidArgs(
            "device path cannot be empty".to_string(),
        ));
    }

    let port = serialport::new(device, DISPLAY_BAUD)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_millis(WRITE_TIMEOUT_MS))
        .open()
        .map_err(map_serial_error)?;

    port.clear(ClearBuffer::All).map_err(map_serial_error)?;
    Ok(port)
}

fn map_serial_error(err: serialport::Error) -> Error {
    use serialport::ErrorKind;

    let kind = match err.kind() {
        ErrorKind::NoDevice => io::ErrorKind::NotFound,
        ErrorKind::InvalidInput => io::ErrorKind::InvalidInput,
        ErrorKind::Io(inner) => inner,
        ErrorKind::Unknown => io::ErrorKind::Other,
    };

    Error::Io(io::Error::new(kind, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_device() {
        let err = open_display_port("").err().unwrap();
        assert!(format!("{err}").contains("device path cannot be empty"));
    }

    #[test]
    fn missing_device_is_an_io_error() {
        match open_display_port("/dev/micropanel-does-not-exist") {
            Err(Error::Io(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("unexpectedly opened a missing device"),
        }
    }
}
