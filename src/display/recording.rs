//! In-memory back-end that records every command and keeps a text model of the screen.
//! Backs the unit and integration tests that run without hardware.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{DisplayBackend, DisplayCommand};

#[derive(Debug, Default)]
struct Recorded {
    commands: Vec<DisplayCommand>,
    screen: BTreeMap<(u8, u8), String>,
    disconnected: bool,
    closed: bool,
}

/// Shared view into what a [`RecordingBackend`] received.
#[derive(Debug, Clone, Default)]
pub struct ScreenLog {
    inner: Arc<Mutex<Recorded>>,
}

impl ScreenLog {
    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn commands(&self) -> Vec<DisplayCommand> {
        self.lock().commands.clone()
    }

    /// Forget recorded commands; the screen model is kept.
    pub fn clear_log(&self) {
        self.lock().commands.clear();
    }

    /// Text last drawn at exactly `(x, y)` since the previous clear.
    pub fn text_at(&self, x: u8, y: u8) -> Option<String> {
        self.lock().screen.get(&(x, y)).cloned()
    }

    /// All visible strings, top to bottom then left to right.
    pub fn lines(&self) -> Vec<String> {
        let guard = self.lock();
        let mut entries: Vec<_> = guard.screen.iter().collect();
        entries.sort_by_key(|((x, y), _)| (*y, *x));
        entries.into_iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }

    pub fn count_clears(&self) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| matches!(c, DisplayCommand::Clear))
            .count()
    }

    pub fn set_disconnected(&self, value: bool) {
        self.lock().disconnected = value;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    log: ScreenLog,
}

impl RecordingBackend {
    pub fn new() -> (Self, ScreenLog) {
        let log = ScreenLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl DisplayBackend for RecordingBackend {
    fn send(&mut self, cmd: &DisplayCommand) {
        let mut guard = self.log.lock();
        match cmd {
            DisplayCommand::Clear => guard.screen.clear(),
            DisplayCommand::DrawText { x, y, text } => {
                guard.screen.insert((*x, *y), text.clone());
            }
            _ => {}
        }
        guard.commands.push(cmd.clone());
    }

    fn is_disconnected(&self) -> bool {
        self.log.lock().disconnected
    }

    fn close(&mut self) {
        self.log.lock().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_text_until_clear() {
        let (mut backend, log) = RecordingBackend::new();
        backend.send(&DisplayCommand::DrawText {
            x: 0,
            y: 8,
            text: "two".into(),
        });
        backend.send(&DisplayCommand::DrawText {
            x: 0,
            y: 0,
            text: "one".into(),
        });
        assert_eq!(log.lines(), vec!["one".to_string(), "two".to_string()]);
        backend.send(&DisplayCommand::Clear);
        assert!(log.lines().is_empty());
        assert_eq!(log.count_clears(), 1);
    }
}
