pub mod errors;
pub mod frame;
pub mod sync;

pub use errors::{classify_io_error, DeviceFailureKind};
pub use frame::{encode, CommandBuffer, CMD_BUFFER_SIZE};
pub use sync::open_display_port;
