use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::app::Logger;
use crate::serial::{classify_io_error, encode, CommandBuffer};

use super::{DisplayBackend, DisplayCommand};

/// Framed-command back-end talking to the panel's microcontroller.
///
/// `W::flush` is expected to block until queued bytes are transmitted (tcdrain for a tty).
pub struct SerialFrameBackend<W: Write> {
    port: Option<W>,
    buffer: Mutex<CommandBuffer>,
    disconnected: AtomicBool,
    logger: Logger,
}

impl<W: Write> SerialFrameBackend<W> {
    pub fn new(port: W, logger: Logger) -> Self {
        Self {
            port: Some(port),
            buffer: Mutex::new(CommandBuffer::default()),
            disconnected: AtomicBool::new(false),
            logger,
        }
    }

    pub fn with_buffer(mut self, buffer: CommandBuffer) -> Self {
        self.buffer = Mutex::new(buffer);
        self
    }

    pub fn port(&self) -> Option<&W> {
        self.port.as_ref()
    }

    pub fn buffered_len(&self) -> usize {
        self.lock_buffer().len()
    }

    fn lock_buffer(&self) -> MutexGuard<'_, CommandBuffer> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_frame(&mut self, bytes: &[u8]) {
        if bytes.is_empty() || self.disconnected.load(Ordering::SeqCst) {
            return;
        }
        let Some(port) = self.port.as_mut() else {
            return;
        };

        if let Err(err) = port.write_all(bytes) {
            let kind = classify_io_error(&err);
            self.logger
                .warn(format!("serial display write failed ({kind:?}): {err}"));
            if kind.is_disconnect() {
                self.logger.warn("serial display disconnected (write)");
                self.disconnected.store(true, Ordering::SeqCst);
            }
        }

        if self.disconnected.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = port.flush() {
            let kind = classify_io_error(&err);
            self.logger
                .warn(format!("serial display drain failed ({kind:?}): {err}"));
            if kind.is_disconnect() {
                self.logger.warn("serial display disconnected (drain)");
                self.disconnected.store(true, Ordering::SeqCst);
            }
        }
    }
}

impl<W: Write> DisplayBackend for SerialFrameBackend<W> {
    fn send(&mut self, cmd: &DisplayCommand) {
        let frame = encode(cmd);
        self.write_frame(&frame);
    }

    fn buffer(&mut self, cmd: &DisplayCommand) {
        let frame = encode(cmd);
        let (pending, oversized) = {
            let mut buffer = self.lock_buffer();
            let pending = if buffer.would_overflow(frame.len()) && !buffer.is_empty() {
                Some(buffer.take())
            } else {
                None
            };
            let oversized = buffer.would_overflow(frame.len());
            if !oversized {
                buffer.append(&frame);
            }
            (pending, oversized)
        };
        if let Some(bytes) = pending {
            self.write_frame(&bytes);
        }
        if oversized {
            self.write_frame(&frame);
        }
    }

    fn flush_buffer(&mut self) {
        let bytes = {
            let mut buffer = self.lock_buffer();
            if buffer.is_empty() {
                return;
            }
            buffer.take()
        };
        self.write_frame(&bytes);
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        if self.port.is_some() {
            self.flush_buffer();
            self.port = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::frame::{CMD_CLEAR, CMD_DRAW_TEXT};
    use rustix::io::Errno;

    #[derive(Debug, Default)]
    struct MockPort {
        writes: Vec<Vec<u8>>,
        flushes: usize,
        fail_with: Option<i32>,
        sink: Option<std::rc::Rc<std::cell::RefCell<Vec<Vec<u8>>>>>,
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(code) = self.fail_with {
                return Err(std::io::Error::from_raw_os_error(code));
            }
            self.writes.push(buf.to_vec());
            if let Some(sink) = &self.sink {
                sink.borrow_mut().push(buf.to_vec());
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    fn backend() -> SerialFrameBackend<MockPort> {
        SerialFrameBackend::new(MockPort::default(), Logger::silent())
    }

    #[test]
    fn send_writes_one_frame_and_drains() {
        let mut b = backend();
        b.send(&DisplayCommand::DrawText {
            x: 0,
            y: 8,
            text: "Hi".into(),
        });
        let port = b.port().unwrap();
        assert_eq!(port.writes, vec![vec![CMD_DRAW_TEXT, 0, 8, b'H', b'i']]);
        assert_eq!(port.flushes, 1);
    }

    #[test]
    fn buffered_frames_flush_before_overflow_without_splitting() {
        let mut b = backend().with_buffer(CommandBuffer::with_capacity(8));
        let text = DisplayCommand::DrawText {
            x: 0,
            y: 0,
            text: "abc".into(),
        };
        b.buffer(&text);
        assert_eq!(b.buffered_len(), 6);
        b.buffer(&text);
        // Second frame did not fit, so the first went out whole.
        assert_eq!(b.port().unwrap().writes.len(), 1);
        assert_eq!(b.port().unwrap().writes[0].len(), 6);
        b.flush_buffer();
        assert_eq!(b.port().unwrap().writes.len(), 2);
        assert_eq!(b.buffered_len(), 0);
    }

    #[test]
    fn eio_latches_disconnected_and_short_circuits() {
        let mut b = backend();
        b.port.as_mut().unwrap().fail_with = Some(Errno::IO.raw_os_error());
        b.send(&DisplayCommand::Clear);
        assert!(b.is_disconnected());
        assert_eq!(b.port().unwrap().flushes, 0);

        b.port.as_mut().unwrap().fail_with = None;
        b.send(&DisplayCommand::Clear);
        assert!(b.port().unwrap().writes.is_empty());
    }

    #[test]
    fn other_errors_do_not_latch() {
        let mut b = backend();
        b.port.as_mut().unwrap().fail_with = Some(Errno::BUSY.raw_os_error());
        b.send(&DisplayCommand::Clear);
        assert!(!b.is_disconnected());
    }

    #[test]
    fn close_flushes_pending_frames() {
        let sink = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let port = MockPort {
            sink: Some(sink.clone()),
            ..MockPort::default()
        };
        let mut b = SerialFrameBackend::new(port, Logger::silent());
        b.buffer(&DisplayCommand::Clear);
        assert!(sink.borrow().is_empty());
        b.close();
        assert!(b.port().is_none());
        assert_eq!(*sink.borrow(), vec![vec![CMD_CLEAR]]);
    }
}
