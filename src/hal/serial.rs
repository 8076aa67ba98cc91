//! Byte-level serial capability.

use embedded_hal::serial::{Read, Write};

/// The point-to-point link the protocol runs over.
///
/// Reception must never block: the control loop polls every iteration
/// and moves on when nothing has arrived.
pub trait SerialPort {
    /// Returns the next received byte, or `None` if the receive
    /// buffer is empty.
    fn try_read_byte(&mut self) -> Option<u8>;

    /// Queues one byte for transmission, waiting for buffer space if
    /// the transmitter is saturated.
    fn write_byte(&mut self, byte: u8);
}

/// Any embedded-hal serial device is a usable port. Receive errors
/// (framing, parity, overrun) surface as "no byte" - line noise is
/// discarded the same way the protocol discards bytes outside a frame.
impl<T> SerialPort for T
where
    T: Read<u8> + Write<u8>,
{
    fn try_read_byte(&mut self) -> Option<u8> {
        self.read().ok()
    }

    fn write_byte(&mut self, byte: u8) {
        let _ = nb::block!(self.write(byte));
    }
}
