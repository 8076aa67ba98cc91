//! Human-readable debug output over a serial port.
//!
//! For adapter bring-up and demo builds; the bootloader itself never
//! writes free text on the command link while a host is framing.

use crate::hal::SerialPort;
use core::convert::Infallible;
use ufmt::uWrite;

pub struct SerialConsole<S> {
    port: S,
}

impl<S: SerialPort> SerialConsole<S> {
    pub fn new(port: S) -> Self {
        Self { port }
    }

    /// Releases the port, e.g. to hand it to the bootloader once
    /// bring-up chatter is done.
    pub fn release(self) -> S {
        self.port
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.port.write_byte(byte);
    }

    pub fn write_line(&mut self, s: &str) {
        let _ = self.write_str(s);
        let _ = self.write_str("\r\n");
    }

    // Debug helper - print hex value
    pub fn write_hex(&mut self, val: u8) {
        const HEX_CHARS: [u8; 16] = *b"0123456789ABCDEF";
        self.write_byte(HEX_CHARS[(val >> 4) as usize]);
        self.write_byte(HEX_CHARS[(val & 0xF) as usize]);
    }

    // Print formatted debug info
    pub fn debug(&mut self, msg: &str, val: u8) {
        let _ = self.write_str("[DBG] ");
        let _ = self.write_str(msg);
        let _ = self.write_str(": 0x");
        self.write_hex(val);
        let _ = self.write_str("\r\n");
    }
}

impl<S: SerialPort> uWrite for SerialConsole<S> {
    type Error = Infallible;

    fn write_str(&mut self, s: &str) -> Result<(), Infallible> {
        for byte in s.bytes() {
            self.port.write_byte(byte);
        }
        Ok(())
    }
}
