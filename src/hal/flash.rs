//! Program-memory capability.

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlashError {
    EraseError,
    WriteError,
    TimeoutError,
}

pub type Result<T> = core::result::Result<T, FlashError>;

/// Non-volatile program memory, word-addressed: one 24-bit instruction
/// word per two address units.
///
/// Erase and write run to completion before returning; the dispatcher
/// never interrupts an operation in flight.
pub trait FlashMemory {
    /// Reads the instruction word at `address`.
    fn read_word(&mut self, address: u32) -> u32;

    /// Erases the page containing `address`.
    fn erase_page(&mut self, address: u32) -> Result<()>;

    /// Programs one write row starting at `address`; `words` holds one
    /// row's worth of instruction words.
    fn write_row(&mut self, address: u32, words: &[u32]) -> Result<()>;
}
