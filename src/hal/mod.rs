//! Capability traits the board adapter implements.

pub mod board;
pub mod flash;
pub mod serial;

// Re-export commonly used types
pub use board::Board;
pub use flash::{FlashError, FlashMemory};
pub use serial::SerialPort;

// The watchdog capability is the embedded-hal trait used as-is.
pub use embedded_hal::watchdog::Watchdog;
