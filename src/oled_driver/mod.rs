//! SSD1306 128x64 OLED driver over a raw I2C write channel.
//! Keeps a page-major framebuffer and pushes partial updates after every draw.

use std::time::Duration;

use crate::Result;

pub mod font;
pub mod rppal_bus;

pub const WIDTH: usize = 128;
pub const HEIGHT: usize = 64;
pub const PAGES: usize = HEIGHT / 8;
pub const FRAMEBUFFER_LEN: usize = WIDTH * PAGES;
pub const DEFAULT_I2C_ADDR: u8 = 0x3C;

const CONTROL_COMMAND: u8 = 0x00;
const CONTROL_DATA: u8 = 0x40;

const SET_CONTRAST: u8 = 0x81;
const DISPLAY_RAM: u8 = 0xA4;
const DISPLAY_NORMAL: u8 = 0xA6;
const DISPLAY_INVERTED: u8 = 0xA7;
const DISPLAY_OFF: u8 = 0xAE;
const DISPLAY_ON: u8 = 0xAF;
const SET_DISPLAY_OFFSET: u8 = 0xD3;
const SET_COM_PINS: u8 = 0xDA;
const SET_VCOM_DETECT: u8 = 0xDB;
const SET_DISPLAY_CLOCK_DIV: u8 = 0xD5;
const SET_PRECHARGE: u8 = 0xD9;
const SET_MULTIPLEX: u8 = 0xA8;
const SET_START_LINE: u8 = 0x40;
const MEMORY_MODE: u8 = 0x20;
const COLUMN_ADDR: u8 = 0x21;
const PAGE_ADDR: u8 = 0x22;
const COM_SCAN_DEC: u8 = 0xC8;
const SEG_REMAP_REVERSE: u8 = 0xA1;
const CHARGE_PUMP: u8 = 0x8D;

/// Power-on command stream, in order.
pub const INIT_SEQUENCE: [u8; 25] = [
    DISPLAY_OFF,
    SET_DISPLAY_CLOCK_DIV,
    0x80,
    SET_MULTIPLEX,
    (HEIGHT - 1) as u8,
    SET_DISPLAY_OFFSET,
    0x00,
    SET_START_LINE,
    CHARGE_PUMP,
    0x14,
    MEMORY_MODE,
    0x00,
    SEG_REMAP_REVERSE,
    COM_SCAN_DEC,
    SET_COM_PINS,
    0x12,
    SET_CONTRAST,
    0xCF,
    SET_PRECHARGE,
    0xF1,
    SET_VCOM_DETECT,
    0x40,
    DISPLAY_RAM,
    DISPLAY_NORMAL,
    DISPLAY_ON,
];

/// Write channel to a device whose slave address is already selected.
/// Returns the number of bytes the kernel accepted.
pub trait I2cBus {
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;
}

/// SSD1306 driver with an in-memory framebuffer.
///
/// Write failures never surface as errors; they latch `disconnected` so the supervisor can
/// decide what to do.
pub struct Ssd1306<B: I2cBus> {
    bus: B,
    buffer: [u8; FRAMEBUFFER_LEN],
    cursor_x: u8,
    cursor_y: u8,
    inverted: bool,
    disconnected: bool,
}

impl<B: I2cBus> Ssd1306<B> {
    /// Wrap a bus without touching the panel. Call [`Ssd1306::init`] afterwards.
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            buffer: [0; FRAMEBUFFER_LEN],
            cursor_x: 0,
            cursor_y: 0,
            inverted: false,
            disconnected: false,
        }
    }

    /// Run the power-on sequence and blank the panel.
    pub fn init(&mut self, settle: Duration) -> bool {
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        for cmd in INIT_SEQUENCE {
            if !self.write_command(cmd) {
                return false;
            }
        }
        self.clear();
        !self.disconnected
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn framebuffer(&self) -> &[u8; FRAMEBUFFER_LEN] {
        &self.buffer
    }

    pub fn cursor(&self) -> (u8, u8) {
        (self.cursor_x, self.cursor_y)
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn clear(&mut self) {
        self.buffer = [0; FRAMEBUFFER_LEN];
        self.set_window(0, (PAGES - 1) as u8, 0, (WIDTH - 1) as u8);
        let frame = self.buffer;
        self.write_data(&frame);
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    pub fn set_cursor(&mut self, x: u8, y: u8) {
        self.cursor_x = x;
        self.cursor_y = y;
    }

    pub fn draw_text(&mut self, x: u8, y: u8, text: &str) {
        self.set_cursor(x, y);
        for c in text.chars() {
            self.draw_char(c);
        }
    }

    pub fn set_inverted(&mut self, inverted: bool) {
        self.inverted = inverted;
        self.write_command(if inverted {
            DISPLAY_INVERTED
        } else {
            DISPLAY_NORMAL
        });
    }

    pub fn set_contrast(&mut self, level: u8) {
        if self.write_command(SET_CONTRAST) {
            self.write_command(level);
        }
    }

    pub fn set_power(&mut self, on: bool) {
        self.write_command(if on { DISPLAY_ON } else { DISPLAY_OFF });
    }

    /// Bordered bar with a proportional fill; `pct` is clamped to 0..=100.
    pub fn draw_progress_bar(&mut self, x: u8, y: u8, width: u8, height: u8, pct: u8) {
        if width == 0 || height == 0 || usize::from(x) >= WIDTH || usize::from(y) >= HEIGHT {
            return;
        }
        let pct = usize::from(pct.min(100));
        let (x, y, w, h) = (
            usize::from(x),
            usize::from(y),
            usize::from(width),
            usize::from(height),
        );
        let fill_w = w * pct / 100;
        let start_page = y / 8;
        let end_page = (y + h - 1) / 8;

        for page in start_page..=end_page.min(PAGES - 1) {
            for col in x..(x + w).min(WIDTH) {
                let mut mask = 0u8;
                for bit in 0..8 {
                    let py = page * 8 + bit;
                    if py < y || py >= y + h {
                        continue;
                    }
                    let border = col == x || col == x + w - 1 || py == y || py == y + h - 1;
                    if border || col < x + fill_w {
                        mask |= 1 << bit;
                    }
                }
                self.buffer[page * WIDTH + col] = mask;
            }
        }
        self.flush_region(start_page, end_page, x, x + w - 1);
    }

    /// Send display-off; used when the device is being released.
    pub fn shutdown(&mut self) {
        self.write_command(DISPLAY_OFF);
    }

    fn draw_char(&mut self, c: char) {
        let page = usize::from(self.cursor_y) / 8;
        let col = usize::from(self.cursor_x);
        if page >= PAGES || col > WIDTH - font::GLYPH_WIDTH {
            return;
        }

        let columns = font::transpose(font::glyph(c));
        let start = page * WIDTH + col;
        self.buffer[start..start + font::GLYPH_WIDTH].copy_from_slice(&columns);
        self.flush_region(page, page, col, col + font::GLYPH_WIDTH - 1);

        let next_x = self.cursor_x.saturating_add(font::GLYPH_WIDTH as u8);
        if usize::from(next_x) > WIDTH - font::GLYPH_WIDTH {
            self.cursor_x = 0;
            self.cursor_y = self.cursor_y.saturating_add(8);
            if usize::from(self.cursor_y) >= HEIGHT {
                self.cursor_y = 0;
            }
        } else {
            self.cursor_x = next_x;
        }
    }

    fn flush_region(&mut self, start_page: usize, end_page: usize, start_col: usize, end_col: usize) {
        let end_page = end_page.min(PAGES - 1);
        let end_col = end_col.min(WIDTH - 1);
        if start_page > end_page || start_col > end_col {
            return;
        }
        for page in start_page..=end_page {
            self.set_window(page as u8, page as u8, start_col as u8, end_col as u8);
            let from = page * WIDTH + start_col;
            let to = page * WIDTH + end_col + 1;
            let slice = self.buffer[from..to].to_vec();
            self.write_data(&slice);
        }
    }

    fn set_window(&mut self, page_start: u8, page_end: u8, col_start: u8, col_end: u8) {
        for cmd in [PAGE_ADDR, page_start, page_end, COLUMN_ADDR, col_start, col_end] {
            self.write_command(cmd);
        }
    }

    fn write_command(&mut self, cmd: u8) -> bool {
        self.write_all(&[CONTROL_COMMAND, cmd])
    }

    fn write_data(&mut self, data: &[u8]) -> bool {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(CONTROL_DATA);
        frame.extend_from_slice(data);
        self.write_all(&frame)
    }

    fn write_all(&mut self, bytes: &[u8]) -> bool {
        if self.disconnected {
            return false;
        }
        match self.bus.write(bytes) {
            Ok(n) if n == bytes.len() => true,
            _ => {
                self.disconnected = true;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[derive(Debug, Default)]
    struct MockBus {
        writes: Vec<Vec<u8>>,
        fail_after: Option<usize>,
    }

    impl I2cBus for MockBus {
        fn write(&mut self, bytes: &[u8]) -> Result<usize> {
            if let Some(limit) = self.fail_after {
                if self.writes.len() >= limit {
                    return Err(Error::Io(std::io::Error::from_raw_os_error(5)));
                }
            }
            self.writes.push(bytes.to_vec());
            Ok(bytes.len())
        }
    }

    impl MockBus {
        fn commands(&self) -> Vec<u8> {
            self.writes
                .iter()
                .filter(|w| w[0] == CONTROL_COMMAND)
                .map(|w| w[1])
                .collect()
        }
    }

    fn ready() -> Ssd1306<MockBus> {
        let mut oled = Ssd1306::new(MockBus::default());
        assert!(oled.init(Duration::ZERO));
        oled.bus.writes.clear();
        oled
    }

    #[test]
    fn init_sends_power_on_sequence_then_clears() {
        let mut oled = Ssd1306::new(MockBus::default());
        assert!(oled.init(Duration::ZERO));
        let cmds = oled.bus.commands();
        assert_eq!(&cmds[..INIT_SEQUENCE.len()], &INIT_SEQUENCE);
        let last = oled.bus.writes.last().unwrap();
        assert_eq!(last[0], CONTROL_DATA);
        assert_eq!(last.len(), FRAMEBUFFER_LEN + 1);
    }

    #[test]
    fn clear_zeroes_framebuffer() {
        let mut oled = ready();
        oled.draw_text(0, 0, "Hi");
        assert!(oled.framebuffer().iter().any(|b| *b != 0));
        oled.clear();
        assert!(oled.framebuffer().iter().all(|b| *b == 0));
        assert_eq!(oled.cursor(), (0, 0));
    }

    #[test]
    fn draw_text_places_transposed_glyphs_and_advances_cursor() {
        let mut oled = ready();
        oled.draw_text(8, 16, "_");
        let fb = oled.framebuffer();
        let page = 2;
        for col in 8..16 {
            assert_eq!(fb[page * WIDTH + col], 0x80);
        }
        assert_eq!(oled.cursor(), (16, 16));
        // Partial update: PAGE_ADDR 2 2, COLUMN_ADDR 8 15, then 8 data bytes.
        assert_eq!(
            oled.bus.commands(),
            vec![PAGE_ADDR, 2, 2, COLUMN_ADDR, 8, 15]
        );
        assert_eq!(oled.bus.writes.last().unwrap().len(), 9);
    }

    #[test]
    fn cursor_wraps_after_last_column_and_bottom_row() {
        let mut oled = ready();
        oled.draw_text(120, 56, "A");
        assert_eq!(oled.cursor(), (0, 0));
        oled.draw_text(112, 0, "A");
        assert_eq!(oled.cursor(), (120, 0));
    }

    #[test]
    fn glyphs_past_the_edge_are_skipped() {
        let mut oled = ready();
        oled.draw_text(124, 0, "X");
        oled.draw_text(0, 64, "X");
        assert!(oled.framebuffer().iter().all(|b| *b == 0));
        assert!(oled.bus.writes.is_empty());
    }

    #[test]
    fn progress_bar_clamps_and_fills_proportionally() {
        let mut oled = ready();
        oled.draw_progress_bar(0, 0, 10, 8, 150);
        let full: Vec<u8> = oled.framebuffer()[..10].to_vec();
        assert!(full.iter().all(|b| *b == 0xFF));

        oled.draw_progress_bar(0, 8, 10, 8, 50);
        let row = &oled.framebuffer()[WIDTH..WIDTH + 10];
        assert_eq!(row[0], 0xFF);
        assert_eq!(row[4], 0xFF);
        // Unfilled interior keeps only top and bottom border bits.
        assert_eq!(row[5], 0x81);
        assert_eq!(row[9], 0xFF);
    }

    #[test]
    fn off_screen_progress_bar_is_ignored() {
        let mut oled = ready();
        oled.draw_progress_bar(130, 0, 10, 8, 50);
        oled.draw_progress_bar(0, 64, 10, 8, 50);
        assert!(oled.bus.writes.is_empty());
        assert!(oled.framebuffer().iter().all(|b| *b == 0));

        oled.draw_progress_bar(120, 0, 20, 8, 100);
        assert_eq!(oled.framebuffer()[WIDTH - 1], 0xFF);
        assert!(!oled.bus.writes.is_empty());
    }

    #[test]
    fn failed_write_latches_disconnected() {
        let mut oled = ready();
        oled.bus.fail_after = Some(0);
        oled.set_inverted(true);
        assert!(oled.is_disconnected());
        oled.set_power(false);
        assert!(oled.bus.writes.is_empty());
    }
}
