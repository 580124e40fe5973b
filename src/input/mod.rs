//! Input sources that normalize encoders, keyboards and GPIO keys into [`InputEvent`]s.

use std::os::fd::AsFd;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags};

use crate::Result;

pub mod evdev;
pub mod gpio;
pub mod hid;

pub use gpio::MultiGpio;
pub use hid::{HidDecoder, HidEncoder};

/// Detent size used for keyboard arrows and GPIO buttons.
pub const KEY_ROTATION_STEP: i32 = 5;

/// Normalized user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Rotate(i32),
    Button,
}

/// Something the supervisor can wait on and drain.
pub trait InputSource {
    /// Block up to `timeout`; returns how many underlying handles are ready.
    fn wait(&mut self, timeout: Duration) -> usize;

    /// Deliver every event that is ready right now, in read order.
    fn drain(&mut self, handler: &mut dyn FnMut(InputEvent));

    /// True once the source lost its device and could not get it back.
    fn is_disconnected(&self) -> bool {
        false
    }
}

/// Poll a set of descriptors for readability. Returns one flag per descriptor.
pub fn poll_readable<F: AsFd>(fds: &[&F], timeout: Duration) -> Result<Vec<bool>> {
    if fds.is_empty() {
        std::thread::sleep(timeout);
        return Ok(Vec::new());
    }
    let mut pollfds: Vec<PollFd> = fds
        .iter()
        .map(|fd| PollFd::new(*fd, PollFlags::POLLIN))
        .collect();
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
    match poll(&mut pollfds, timeout_ms) {
        Ok(_) => {}
        Err(nix::errno::Errno::EINTR) => return Ok(vec![false; fds.len()]),
        Err(err) => return Err(err.into()),
    }
    Ok(pollfds
        .iter()
        .map(|p| {
            p.revents().map_or(false, |r| {
                r.intersects(PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP)
            })
        })
        .collect())
}

/// Scripted source for tests: each `wait` hands out the next batch.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    batches: std::collections::VecDeque<Vec<InputEvent>>,
    disconnect_after: Option<usize>,
    drained: usize,
}

impl ScriptedInput {
    pub fn new(batches: Vec<Vec<InputEvent>>) -> Self {
        Self {
            batches: batches.into(),
            disconnect_after: None,
            drained: 0,
        }
    }

    /// Report a lost device once `batches` batches have been drained.
    pub fn disconnect_after(mut self, batches: usize) -> Self {
        self.disconnect_after = Some(batches);
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.batches.is_empty()
    }
}

impl InputSource for ScriptedInput {
    fn wait(&mut self, _timeout: Duration) -> usize {
        usize::from(!self.batches.is_empty() && !self.is_disconnected())
    }

    fn drain(&mut self, handler: &mut dyn FnMut(InputEvent)) {
        if let Some(batch) = self.batches.pop_front() {
            self.drained += 1;
            for ev in batch {
                handler(ev);
            }
        }
    }

    fn is_disconnected(&self) -> bool {
        self.disconnect_after.is_some_and(|n| self.drained >= n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_input_hands_out_batches_in_order() {
        let mut input = ScriptedInput::new(vec![
            vec![InputEvent::Rotate(1)],
            vec![InputEvent::Button, InputEvent::Rotate(-1)],
        ]);
        let mut seen = Vec::new();
        while input.wait(Duration::ZERO) > 0 {
            input.drain(&mut |ev| seen.push(ev));
        }
        assert_eq!(
            seen,
            vec![InputEvent::Rotate(1), InputEvent::Button, InputEvent::Rotate(-1)]
        );
    }

    #[test]
    fn poll_reports_readable_socket() {
        use std::io::Write;
        let (reader, mut writer) = std::os::unix::net::UnixStream::pair().unwrap();
        let idle = poll_readable(&[&reader], Duration::from_millis(1)).unwrap();
        assert_eq!(idle, vec![false]);
        writer.write_all(b"x").unwrap();
        let ready = poll_readable(&[&reader], Duration::from_millis(10)).unwrap();
        assert_eq!(ready, vec![true]);
    }
}
