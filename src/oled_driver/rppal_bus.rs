use crate::{oled_driver::I2cBus, Error, Result};

/// Extract the bus number from a `/dev/i2c-N` path.
pub fn bus_number(path: &str) -> Result<u8> {
    path.strip_prefix("/dev/i2c-")
        .and_then(|n| n.parse::<u8>().ok())
        .ok_or_else(|| Error::InvalidArgs(format!("'{path}' is not an /dev/i2c-N path")))
}

#[cfg(target_os = "linux")]
fn map_i2c_err(err: rppal::i2c::Error) -> Error {
    Error::Io(std::io::Error::other(err.to_string()))
}

/// Linux I2C channel bound to a single slave address.
#[cfg(target_os = "linux")]
pub struct RppalBus {
    inner: rppal::i2c::I2c,
}

#[cfg(target_os = "linux")]
impl RppalBus {
    pub fn open(path: &str, addr: u8) -> Result<Self> {
        let mut inner = rppal::i2c::I2c::with_bus(bus_number(path)?).map_err(map_i2c_err)?;
        inner
            .set_slave_address(u16::from(addr))
            .map_err(map_i2c_err)?;
        Ok(Self { inner })
    }
}

#[cfg(target_os = "linux")]
impl I2cBus for RppalBus {
    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.inner.write(bytes).map_err(map_i2c_err)
    }
}

/// Non-Linux stub so the crate builds on dev hosts.
#[cfg(not(target_os = "linux"))]
pub struct RppalBus;

#[cfg(not(target_os = "linux"))]
impl RppalBus {
    pub fn open(_path: &str, _addr: u8) -> Result<Self> {
        Err(Error::InvalidArgs(
            "I2C displays are only available on Linux targets".into(),
        ))
    }
}

#[cfg(not(target_os = "linux"))]
impl I2cBus for RppalBus {
    fn write(&mut self, _bytes: &[u8]) -> Result<usize> {
        Err(Error::InvalidArgs(
            "I2C displays are only available on Linux targets".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bus_number_from_path() {
        assert_eq!(bus_number("/dev/i2c-1").unwrap(), 1);
        assert_eq!(bus_number("/dev/i2c-12").unwrap(), 12);
        assert!(bus_number("/dev/ttyACM0").is_err());
    }
}
