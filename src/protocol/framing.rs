//! Frame encoding and the receive-side parse state machine.

use super::checksum::{fletcher16, Fletcher16};
use super::{END_OF_FRAME, ESC, ESC_XOR, START_OF_FRAME};
use crate::config::RX_BUF_LEN;
use crate::hal::SerialPort;

/// Streams reply frames out the serial port, escaping marker bytes and
/// accumulating the checksum as it goes. The length field counts the
/// command byte plus the argument bytes.
pub struct FrameEncoder {
    checksum: Fletcher16,
}

impl FrameEncoder {
    pub const fn new() -> Self {
        Self {
            checksum: Fletcher16::new(),
        }
    }

    /// Sends a string reply, NUL terminator included.
    pub fn send_str<S: SerialPort>(&mut self, port: &mut S, command: u8, text: &str) {
        self.header(port, command, text.len() as u16 + 1);
        for byte in text.bytes() {
            self.push(port, byte);
        }
        self.push(port, 0x00);
        self.finish(port);
    }

    /// Sends a single 16-bit value, little-endian.
    pub fn send_u16<S: SerialPort>(&mut self, port: &mut S, command: u8, value: u16) {
        self.header(port, command, 2);
        for byte in value.to_le_bytes() {
            self.push(port, byte);
        }
        self.finish(port);
    }

    /// Sends an array of 32-bit words, little-endian.
    pub fn send_u32s<S: SerialPort>(&mut self, port: &mut S, command: u8, words: &[u32]) {
        self.header(port, command, (words.len() * 4) as u16);
        for word in words {
            for byte in word.to_le_bytes() {
                self.push(port, byte);
            }
        }
        self.finish(port);
    }

    fn header<S: SerialPort>(&mut self, port: &mut S, command: u8, arg_len: u16) {
        // the command byte counts toward the length field
        let length = arg_len + 1;
        self.checksum.reset();
        port.write_byte(START_OF_FRAME);
        self.push(port, (length & 0x00FF) as u8);
        self.push(port, (length >> 8) as u8);
        self.push(port, command);
    }

    fn push<S: SerialPort>(&mut self, port: &mut S, byte: u8) {
        if byte == START_OF_FRAME || byte == END_OF_FRAME || byte == ESC {
            port.write_byte(ESC);
            port.write_byte(byte ^ ESC_XOR);
        } else {
            port.write_byte(byte);
        }
        self.checksum.accumulate(byte);
    }

    fn finish<S: SerialPort>(&mut self, port: &mut S) {
        // capture the checksum before its own bytes feed the accumulator
        let checksum = self.checksum.value();
        self.push(port, (checksum & 0x00FF) as u8);
        self.push(port, (checksum >> 8) as u8);
        port.write_byte(END_OF_FRAME);
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum DecodeState {
    WaitForStart,
    Verbatim,
    Escaped,
}

/// Single-pass decoder over the incoming byte stream.
///
/// Bytes outside a frame are discarded. A start marker inside a frame
/// restarts framing: it cannot occur unescaped in a well-formed frame
/// body, so the previous frame is a lost cause and the new one is
/// picked up instead. Escaped bytes are exempt, they decode to
/// whatever the XOR yields.
pub struct FrameDecoder {
    buffer: [u8; RX_BUF_LEN],
    len: usize,
    state: DecodeState,
}

impl FrameDecoder {
    pub const fn new() -> Self {
        Self {
            buffer: [0; RX_BUF_LEN],
            len: 0,
            state: DecodeState::WaitForStart,
        }
    }

    /// True while a frame is partially received.
    pub fn in_frame(&self) -> bool {
        self.state != DecodeState::WaitForStart
    }

    /// Discards any half-received frame.
    pub fn reset(&mut self) {
        self.len = 0;
        self.state = DecodeState::WaitForStart;
    }

    /// Feeds one byte through the state machine. Returns the verified
    /// message (checksum stripped) when an end marker completes a
    /// frame whose checksum matches; `None` otherwise.
    pub fn push(&mut self, byte: u8) -> Option<&[u8]> {
        match self.state {
            DecodeState::WaitForStart => {
                if byte == START_OF_FRAME {
                    self.len = 0;
                    self.state = DecodeState::Verbatim;
                }
                None
            }
            DecodeState::Verbatim => match byte {
                ESC => {
                    self.state = DecodeState::Escaped;
                    None
                }
                END_OF_FRAME => self.complete(),
                START_OF_FRAME => {
                    self.len = 0;
                    None
                }
                _ => {
                    self.append(byte);
                    None
                }
            },
            DecodeState::Escaped => {
                self.state = DecodeState::Verbatim;
                self.append(byte ^ ESC_XOR);
                None
            }
        }
    }

    fn append(&mut self, byte: u8) {
        if self.len == RX_BUF_LEN {
            // unterminated or malformed stream; drop the lot
            self.reset();
            return;
        }
        self.buffer[self.len] = byte;
        self.len += 1;
    }

    fn complete(&mut self) -> Option<&[u8]> {
        self.state = DecodeState::WaitForStart;
        let len = self.len;
        self.len = 0;

        // a usable message holds at least one payload byte plus the
        // two checksum bytes
        if len < 3 {
            return None;
        }

        let body = len - 2;
        let received = u16::from_le_bytes([self.buffer[body], self.buffer[body + 1]]);
        if received != fletcher16(&self.buffer[..body]) {
            return None;
        }

        Some(&self.buffer[..body])
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
