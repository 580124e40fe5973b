//! Digit-wise IPv4 editor used by the ping, iperf3 client and network settings screens.

use std::net::Ipv4Addr;

use crate::display::{pad_line, Display, TEXT_COLUMNS};

/// Digits addressable by the cursor (three per octet).
pub const DIGITS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpEditor {
    octets: [u8; 4],
    cursor: usize,
    editing: bool,
    /// Row of the address; the cursor marker goes on the row below.
    y: u8,
}

impl IpEditor {
    pub fn new(ip: &str, y: u8) -> Self {
        let mut editor = Self {
            octets: [0; 4],
            cursor: 0,
            editing: false,
            y,
        };
        editor.set_ip(ip);
        editor
    }

    /// Accepts `192.168.1.1` or the zero-padded form. Returns false and keeps the old value
    /// when the text is not a dotted quad.
    pub fn set_ip(&mut self, ip: &str) -> bool {
        match parse_octets(ip) {
            Some(octets) => {
                self.octets = octets;
                true
            }
            None => false,
        }
    }

    /// Fixed-width `AAA.BBB.CCC.DDD`.
    pub fn ip(&self) -> String {
        let [a, b, c, d] = self.octets;
        format!("{a:03}.{b:03}.{c:03}.{d:03}")
    }

    /// Without leading zeros, for handing to external commands.
    pub fn address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.octets)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.editing = false;
    }

    /// Toggle edit mode.
    pub fn on_button(&mut self) -> bool {
        self.editing = !self.editing;
        true
    }

    /// Returns false when the rotation should move focus off the editor instead.
    pub fn on_rotate(&mut self, steps: i32) -> bool {
        let direction = steps.signum();
        if direction == 0 {
            return true;
        }
        if self.editing {
            let octet = self.cursor / 3;
            let place = match self.cursor % 3 {
                0 => 100,
                1 => 10,
                _ => 1,
            };
            let value = i32::from(self.octets[octet]) + direction * place;
            self.octets[octet] = value.clamp(0, 255) as u8;
            return true;
        }
        if direction > 0 && self.cursor + 1 < DIGITS {
            self.cursor += 1;
            true
        } else if direction < 0 && self.cursor > 0 {
            self.cursor -= 1;
            true
        } else {
            false
        }
    }

    /// Screen column of the digit under the cursor, counting the leading marker column.
    fn cursor_column(&self) -> usize {
        1 + (self.cursor / 3) * 4 + self.cursor % 3
    }

    pub fn draw(&self, display: &mut Display, selected: bool) {
        let marker = if selected { '>' } else { ' ' };
        display.draw_text(0, self.y, &pad_line(&format!("{marker}{}", self.ip())));
        let mut caret = vec![' '; TEXT_COLUMNS];
        if selected {
            caret[self.cursor_column()] = if self.editing { '*' } else { '^' };
        }
        let caret: String = caret.into_iter().collect();
        display.draw_text(0, self.y.saturating_add(8), &caret);
    }
}

fn parse_octets(ip: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut parts = ip.trim().split('.');
    for slot in &mut octets {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 {
            return None;
        }
        *slot = part.parse::<u16>().ok().and_then(|v| u8::try_from(v).ok())?;
    }
    parts.next().is_none().then_some(octets)
}
