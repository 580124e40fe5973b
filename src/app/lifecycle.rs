use crate::display::Display;
use crate::{Error, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

pub(crate) const SHUTDOWN_MESSAGE: &str = "Rebooting.....";

/// Install a SIGINT/SIGTERM handler that flips the shared running flag instead of exiting.
pub(super) fn create_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let running_handle = running.clone();

    ctrlc::set_handler(move || {
        running_handle.store(false, Ordering::SeqCst);
    })
    .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    Ok(running)
}

/// Leave the shutdown message on the panel before the devices close.
pub(super) fn render_shutdown(display: &mut Display) {
    display.set_power(true);
    display.clear();
    display.draw_text(0, 0, SHUTDOWN_MESSAGE);
    display.flush_buffer();
}
