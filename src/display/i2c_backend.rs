use std::time::Duration;

use crate::app::Logger;
#[cfg(target_os = "linux")]
use crate::oled_driver::rppal_bus::RppalBus;
use crate::oled_driver::{I2cBus, Ssd1306, DEFAULT_I2C_ADDR};
use crate::{Error, Result};

use super::{DisplayBackend, DisplayCommand};

const POWER_ON_SETTLE: Duration = Duration::from_millis(100);

/// In-process SSD1306 back-end.
pub struct I2cSsd1306Backend<B: I2cBus> {
    oled: Option<Ssd1306<B>>,
}

#[cfg(target_os = "linux")]
impl I2cSsd1306Backend<RppalBus> {
    /// Open `/dev/i2c-N`, select the panel address, and run the init sequence.
    pub fn open(path: &str, logger: &Logger) -> Result<Self> {
        let bus = RppalBus::open(path, DEFAULT_I2C_ADDR)?;
        logger.info(format!("initializing SSD1306 on {path}"));
        let backend = Self::with_bus(bus, POWER_ON_SETTLE)?;
        logger.info("SSD1306 initialization complete");
        Ok(backend)
    }
}

impl<B: I2cBus> I2cSsd1306Backend<B> {
    pub fn with_bus(bus: B, settle: Duration) -> Result<Self> {
        let mut oled = Ssd1306::new(bus);
        if !oled.init(settle) {
            return Err(Error::Device("SSD1306 did not accept the init sequence".into()));
        }
        Ok(Self { oled: Some(oled) })
    }

    pub fn driver(&self) -> Option<&Ssd1306<B>> {
        self.oled.as_ref()
    }
}

impl<B: I2cBus> DisplayBackend for I2cSsd1306Backend<B> {
    fn send(&mut self, cmd: &DisplayCommand) {
        let Some(oled) = self.oled.as_mut() else {
            return;
        };
        match cmd {
            DisplayCommand::Clear => oled.clear(),
            DisplayCommand::DrawText { x, y, text } => oled.draw_text(*x, *y, text),
            DisplayCommand::SetCursor { x, y } => oled.set_cursor(*x, *y),
            DisplayCommand::Invert(on) => oled.set_inverted(*on),
            DisplayCommand::Brightness(level) => oled.set_contrast(*level),
            DisplayCommand::ProgressBar {
                x,
                y,
                width,
                height,
                pct,
            } => oled.draw_progress_bar(*x, *y, *width, *height, *pct),
            DisplayCommand::Power(on) => oled.set_power(*on),
        }
    }

    fn is_disconnected(&self) -> bool {
        self.oled.as_ref().map_or(true, |o| o.is_disconnected())
    }

    fn close(&mut self) {
        if let Some(mut oled) = self.oled.take() {
            oled.shutdown();
        }
    }

    fn is_i2c(&self) -> bool {
        true
    }
}
