//! Scrolling list shared by menus and list-like modules.
//!
//! Layout: title at row 0, a separator at row 8, then up to [`MAX_VISIBLE`] items from row 16.

use crate::display::{pad_line, Display, TEXT_COLUMNS};

pub const MAX_VISIBLE: usize = 6;
pub const SEPARATOR: &str = "----------------";
pub const FIRST_ROW_Y: u8 = 16;
pub const ROW_HEIGHT: u8 = 8;
pub const INDICATOR_X: u8 = 122;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListView {
    items: Vec<String>,
    selected: usize,
    first_visible: usize,
    /// Row reflecting current system state, drawn as `[title]`.
    marked: Option<usize>,
}

impl ListView {
    pub fn new(items: Vec<String>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn selected_item(&self) -> Option<&str> {
        self.items.get(self.selected).map(String::as_str)
    }

    pub fn first_visible(&self) -> usize {
        self.first_visible
    }

    pub fn marked(&self) -> Option<usize> {
        self.marked
    }

    pub fn set_marked(&mut self, marked: Option<usize>) {
        self.marked = marked.filter(|&i| i < self.items.len());
    }

    /// Replace the rows, keeping the selection when it is still in range.
    pub fn set_items(&mut self, items: Vec<String>) {
        self.items = items;
        if self.selected >= self.items.len() {
            self.selected = self.items.len().saturating_sub(1);
        }
        self.marked = self.marked.filter(|&i| i < self.items.len());
        self.scroll_to_selection();
    }

    pub fn reset(&mut self) {
        self.selected = 0;
        self.first_visible = 0;
    }

    pub fn select(&mut self, index: usize) {
        if index < self.items.len() {
            self.selected = index;
            self.scroll_to_selection();
        }
    }

    /// Move one row in the direction of `direction`, clamped at both ends.
    /// Returns `(moved, scrolled)`.
    pub fn move_by(&mut self, direction: i32) -> (bool, bool) {
        let before = (self.selected, self.first_visible);
        if direction < 0 && self.selected > 0 {
            self.selected -= 1;
        } else if direction > 0 && self.selected + 1 < self.items.len() {
            self.selected += 1;
        }
        self.scroll_to_selection();
        (self.selected != before.0, self.first_visible != before.1)
    }

    fn scroll_to_selection(&mut self) {
        if self.selected < self.first_visible {
            self.first_visible = self.selected;
        } else if self.selected >= self.first_visible + MAX_VISIBLE {
            self.first_visible = self.selected + 1 - MAX_VISIBLE;
        }
        let max_first = self.items.len().saturating_sub(MAX_VISIBLE);
        self.first_visible = self.first_visible.min(max_first);
    }

    /// The 16-column text for item `index`.
    pub fn row_text(&self, index: usize) -> String {
        let title = self.items.get(index).map(String::as_str).unwrap_or("");
        let text = match (index == self.selected, Some(index) == self.marked) {
            (true, true) => format!(">[{title}]"),
            (true, false) => format!("> {title}"),
            (false, true) => format!(" [{title}]"),
            (false, false) => format!("  {title}"),
        };
        pad_line(&text)
    }

    fn row_y(&self, index: usize) -> Option<u8> {
        let slot = index.checked_sub(self.first_visible)?;
        (slot < MAX_VISIBLE).then(|| FIRST_ROW_Y + slot as u8 * ROW_HEIGHT)
    }

    /// Clear, then title, separator and rows.
    pub fn render_full(&self, display: &mut Display, title: &str) {
        display.clear();
        display.draw_text(0, 0, title);
        display.draw_text(0, 8, SEPARATOR);
        self.render_rows(display);
    }

    /// Redraw every visible row, blanking unused slots.
    pub fn render_rows(&self, display: &mut Display) {
        for slot in 0..MAX_VISIBLE {
            let y = FIRST_ROW_Y + slot as u8 * ROW_HEIGHT;
            let index = self.first_visible + slot;
            if index < self.items.len() {
                display.draw_text(0, y, &self.row_text(index));
            } else {
                display.draw_text(0, y, &" ".repeat(TEXT_COLUMNS));
            }
        }
        self.render_indicators(display);
    }

    fn render_indicators(&self, display: &mut Display) {
        if self.first_visible > 0 {
            display.draw_text(INDICATOR_X, FIRST_ROW_Y, "^");
        }
        if self.first_visible + MAX_VISIBLE < self.items.len() {
            let last = FIRST_ROW_Y + (MAX_VISIBLE as u8 - 1) * ROW_HEIGHT;
            display.draw_text(INDICATOR_X, last, "v");
        }
    }

    /// Apply a rotation and redraw only what changed. Returns true when the selection moved.
    pub fn rotate(&mut self, direction: i32, display: &mut Display) -> bool {
        let previous = self.selected;
        let (moved, scrolled) = self.move_by(direction);
        if !moved {
            return false;
        }
        if scrolled {
            self.render_rows(display);
        } else {
            for index in [previous, self.selected] {
                if let Some(y) = self.row_y(index) {
                    display.draw_text(0, y, &self.row_text(index));
                }
            }
            self.render_indicators(display);
        }
        true
    }
}
