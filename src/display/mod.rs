//! Display abstraction: command set, back-end trait, and the power-aware `Display` wrapper.

use std::time::{Duration, Instant};

pub mod i2c_backend;
pub mod recording;
pub mod serial_backend;

pub use i2c_backend::I2cSsd1306Backend;
pub use recording::{RecordingBackend, ScreenLog};
pub use serial_backend::SerialFrameBackend;

pub const DEFAULT_BRIGHTNESS: u8 = 128;
pub const POWER_SAVE_TIMEOUT: Duration = Duration::from_secs(10);
/// Characters per 8-px text row.
pub const TEXT_COLUMNS: usize = 16;

/// One drawing operation, independent of how it reaches the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayCommand {
    Clear,
    DrawText { x: u8, y: u8, text: String },
    SetCursor { x: u8, y: u8 },
    Invert(bool),
    Brightness(u8),
    ProgressBar {
        x: u8,
        y: u8,
        width: u8,
        height: u8,
        pct: u8,
    },
    Power(bool),
}

/// A sink for display commands.
///
/// `send` delivers immediately. `buffer` may stage the command until `flush_buffer`; back-ends
/// without a staging area deliver it straight away.
pub trait DisplayBackend {
    fn send(&mut self, cmd: &DisplayCommand);

    fn buffer(&mut self, cmd: &DisplayCommand) {
        self.send(cmd);
    }

    fn flush_buffer(&mut self) {}

    fn is_disconnected(&self) -> bool;

    /// Release the device. Pending buffered commands are delivered first.
    fn close(&mut self);

    /// I2C panels are wired to the host and never hot-unplugged.
    fn is_i2c(&self) -> bool {
        false
    }
}

/// Snapshot of what the wrapper believes the panel is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayState {
    pub inverted: bool,
    pub brightness: u8,
    pub powered: bool,
    pub power_save_enabled: bool,
    pub power_save_tripped: bool,
}

/// Owns a back-end and tracks inversion, brightness, power and user activity.
pub struct Display {
    backend: Box<dyn DisplayBackend>,
    state: DisplayState,
    last_activity: Instant,
    power_save_timeout: Duration,
}

impl Display {
    pub fn new(backend: Box<dyn DisplayBackend>) -> Self {
        Self {
            backend,
            state: DisplayState {
                inverted: false,
                brightness: DEFAULT_BRIGHTNESS,
                powered: true,
                power_save_enabled: false,
                power_save_tripped: false,
            },
            last_activity: Instant::now(),
            power_save_timeout: POWER_SAVE_TIMEOUT,
        }
    }

    pub fn with_power_save_timeout(mut self, timeout: Duration) -> Self {
        self.power_save_timeout = timeout;
        self
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn clear(&mut self) {
        self.backend.send(&DisplayCommand::Clear);
    }

    pub fn draw_text(&mut self, x: u8, y: u8, text: &str) {
        self.backend.send(&DisplayCommand::DrawText {
            x,
            y,
            text: text.to_string(),
        });
    }

    /// Like `draw_text` but allowed to sit in the back-end's staging buffer until the next flush.
    pub fn draw_text_buffered(&mut self, x: u8, y: u8, text: &str) {
        self.backend.buffer(&DisplayCommand::DrawText {
            x,
            y,
            text: text.to_string(),
        });
    }

    pub fn set_cursor(&mut self, x: u8, y: u8) {
        self.backend.send(&DisplayCommand::SetCursor { x, y });
    }

    pub fn set_inverted(&mut self, inverted: bool) {
        self.backend.send(&DisplayCommand::Invert(inverted));
        self.state.inverted = inverted;
    }

    pub fn is_inverted(&self) -> bool {
        self.state.inverted
    }

    pub fn set_brightness(&mut self, level: i32) {
        let level = level.clamp(0, 255) as u8;
        self.backend.send(&DisplayCommand::Brightness(level));
        self.state.brightness = level;
    }

    pub fn brightness(&self) -> u8 {
        self.state.brightness
    }

    pub fn draw_progress_bar(&mut self, x: u8, y: u8, width: u8, height: u8, pct: i32) {
        self.backend.send(&DisplayCommand::ProgressBar {
            x,
            y,
            width,
            height,
            pct: pct.clamp(0, 100) as u8,
        });
    }

    pub fn set_power(&mut self, on: bool) {
        if on == self.state.powered {
            return;
        }
        self.backend.send(&DisplayCommand::Power(on));
        self.state.powered = on;
        self.state.power_save_tripped = !on;
    }

    pub fn is_powered(&self) -> bool {
        self.state.powered
    }

    pub fn enable_power_save(&mut self, enable: bool) {
        self.state.power_save_enabled = enable;
        if enable {
            self.last_activity = Instant::now();
            self.set_power(true);
        }
    }

    /// Record user activity; wakes the panel if power-save had turned it off.
    pub fn update_activity_timestamp(&mut self) {
        self.last_activity = Instant::now();
        if self.state.power_save_enabled && !self.state.powered {
            self.set_power(true);
        }
    }

    /// Turn the panel off once it has been idle for the power-save timeout.
    /// Returns true when this call tripped power-save.
    pub fn check_power_save_timeout(&mut self) -> bool {
        self.check_power_save_at(Instant::now())
    }

    pub fn check_power_save_at(&mut self, now: Instant) -> bool {
        if !self.state.power_save_enabled || !self.state.powered {
            return false;
        }
        if now.saturating_duration_since(self.last_activity) >= self.power_save_timeout {
            self.set_power(false);
            return true;
        }
        false
    }

    pub fn flush_buffer(&mut self) {
        self.backend.flush_buffer();
    }

    pub fn is_disconnected(&self) -> bool {
        self.backend.is_disconnected()
    }

    pub fn is_i2c(&self) -> bool {
        self.backend.is_i2c()
    }

    pub fn close(&mut self) {
        self.backend.close();
    }
}

/// Truncate to the panel width.
pub fn fit_line(text: &str) -> String {
    text.chars().take(TEXT_COLUMNS).collect()
}

/// Truncate or right-pad with spaces to exactly the panel width.
pub fn pad_line(text: &str) -> String {
    format!("{:<width$}", fit_line(text), width = TEXT_COLUMNS)
}

/// Center within the panel width, truncating first.
pub fn center_line(text: &str) -> String {
    let fitted = fit_line(text);
    let pad = (TEXT_COLUMNS - fitted.chars().count()) / 2;
    format!("{}{}", " ".repeat(pad), fitted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display() -> (Display, ScreenLog) {
        let (backend, log) = RecordingBackend::new();
        (Display::new(Box::new(backend)), log)
    }

    #[test]
    fn brightness_is_clamped() {
        let (mut d, log) = display();
        d.set_brightness(300);
        assert_eq!(d.brightness(), 255);
        d.set_brightness(-5);
        assert_eq!(d.brightness(), 0);
        assert_eq!(
            log.commands(),
            vec![DisplayCommand::Brightness(255), DisplayCommand::Brightness(0)]
        );
    }

    #[test]
    fn progress_percentage_is_clamped() {
        let (mut d, log) = display();
        d.draw_progress_bar(10, 30, 108, 15, 150);
        d.draw_progress_bar(10, 30, 108, 15, 100);
        let cmds = log.commands();
        assert_eq!(cmds[0], cmds[1]);
    }

    #[test]
    fn set_power_is_noop_when_unchanged() {
        let (mut d, log) = display();
        d.set_power(true);
        assert!(log.commands().is_empty());
        d.set_power(false);
        d.set_power(false);
        assert_eq!(log.commands(), vec![DisplayCommand::Power(false)]);
        assert!(d.state().power_save_tripped);
    }

    #[test]
    fn power_save_trips_after_idle_and_activity_wakes() {
        let (mut d, log) = display();
        d.enable_power_save(true);
        let start = d.last_activity();
        assert!(!d.check_power_save_at(start + Duration::from_secs(9)));
        assert!(d.check_power_save_at(start + Duration::from_secs(10)));
        assert!(!d.is_powered());
        assert!(d.state().power_save_tripped);

        d.update_activity_timestamp();
        assert!(d.is_powered());
        assert!(!d.state().power_save_tripped);
        assert_eq!(
            log.commands(),
            vec![DisplayCommand::Power(false), DisplayCommand::Power(true)]
        );
    }

    #[test]
    fn activity_advances_timestamp() {
        let (mut d, _log) = display();
        let before = d.last_activity();
        std::thread::sleep(Duration::from_millis(2));
        d.update_activity_timestamp();
        assert!(d.last_activity() > before);
    }

    #[test]
    fn line_helpers_fit_the_panel() {
        assert_eq!(pad_line("abc").len(), 16);
        assert_eq!(fit_line("0123456789abcdefXYZ"), "0123456789abcdef");
        assert_eq!(center_line("Info"), "      Info");
    }
}
