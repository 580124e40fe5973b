//! Byte framing for the serial display protocol.

use std::time::Instant;

use crate::display::DisplayCommand;

pub const CMD_CLEAR: u8 = 0x01;
pub const CMD_DRAW_TEXT: u8 = 0x02;
pub const CMD_SET_CURSOR: u8 = 0x03;
pub const CMD_INVERT: u8 = 0x04;
pub const CMD_BRIGHTNESS: u8 = 0x05;
pub const CMD_PROGRESS_BAR: u8 = 0x06;
pub const CMD_POWER_MODE: u8 = 0x07;

pub const CMD_BUFFER_SIZE: usize = 256;

/// Encode one command as a self-delimiting wire frame.
pub fn encode(cmd: &DisplayCommand) -> Vec<u8> {
    match cmd {
        DisplayCommand::Clear => vec![CMD_CLEAR],
        DisplayCommand::DrawText { x, y, text } => {
            let mut frame = Vec::with_capacity(text.len() + 3);
            frame.extend_from_slice(&[CMD_DRAW_TEXT, *x, *y]);
            frame.extend_from_slice(text.as_bytes());
            frame
        }
        DisplayCommand::SetCursor { x, y } => vec![CMD_SET_CURSOR, *x, *y],
        DisplayCommand::Invert(on) => vec![CMD_INVERT, u8::from(*on)],
        DisplayCommand::Brightness(level) => vec![CMD_BRIGHTNESS, *level],
        DisplayCommand::ProgressBar {
            x,
            y,
            width,
            height,
            pct,
        } => vec![CMD_PROGRESS_BAR, *x, *y, *width, *height, (*pct).min(100)],
        DisplayCommand::Power(on) => vec![CMD_POWER_MODE, u8::from(*on)],
    }
}

/// Bounded staging area for frames; never holds a partial frame.
#[derive(Debug)]
pub struct CommandBuffer {
    bytes: Vec<u8>,
    capacity: usize,
    last_flush: Instant,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::with_capacity(CMD_BUFFER_SIZE)
    }
}

impl CommandBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
            last_flush: Instant::now(),
        }
    }

    /// True when appending `len` more bytes would overflow.
    pub fn would_overflow(&self, len: usize) -> bool {
        self.bytes.len() + len > self.capacity
    }

    pub fn append(&mut self, frame: &[u8]) {
        self.bytes.extend_from_slice(frame);
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }

    /// Hand out everything staged so far and restart the flush clock.
    pub fn take(&mut self) -> Vec<u8> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_lengths_match_protocol() {
        assert_eq!(encode(&DisplayCommand::Clear).len(), 1);
        let text = DisplayCommand::DrawText {
            x: 0,
            y: 16,
            text: "Hello".into(),
        };
        assert_eq!(encode(&text), vec![CMD_DRAW_TEXT, 0, 16, b'H', b'e', b'l', b'l', b'o']);
        assert_eq!(encode(&DisplayCommand::SetCursor { x: 1, y: 2 }).len(), 3);
        assert_eq!(encode(&DisplayCommand::Invert(true)), vec![CMD_INVERT, 1]);
        assert_eq!(encode(&DisplayCommand::Brightness(200)), vec![CMD_BRIGHTNESS, 200]);
        assert_eq!(encode(&DisplayCommand::Power(false)), vec![CMD_POWER_MODE, 0]);
    }

    #[test]
    fn progress_frame_clamps_percentage() {
        let bar = DisplayCommand::ProgressBar {
            x: 10,
            y: 30,
            width: 108,
            height: 15,
            pct: 150,
        };
        assert_eq!(encode(&bar), vec![CMD_PROGRESS_BAR, 10, 30, 108, 15, 100]);
    }

    #[test]
    fn buffer_reports_overflow_before_append() {
        let mut buf = CommandBuffer::with_capacity(4);
        assert!(!buf.would_overflow(3));
        buf.append(&[1, 2, 3]);
        assert!(buf.would_overflow(2));
        assert_eq!(buf.take(), vec![1, 2, 3]);
        assert!(buf.is_empty());
    }
}
