//! Configuration for the bootloader core.

/// Most words a single read or write transaction may carry.
///
/// Sizes the fixed message buffers; `BootConfig::max_prog_words` may be
/// set lower than this but never higher.
pub const MAX_PROG_WORDS: usize = 0x80;

/// Capacity of the receive message buffer, sized to the largest
/// write-block frame plus header, command and checksum slack.
pub const RX_BUF_LEN: usize = MAX_PROG_WORDS * 4 + 0x10;

/// Per-target description of flash geometry, protected ranges and
/// timing, built by the board adapter and handed to
/// [`Bootloader::new`](crate::Bootloader::new).
///
/// Addresses count program-memory address units: each instruction word
/// occupies two units, so a row of `flash_row` words spans
/// `flash_row * 2` units.
#[derive(Clone, Copy)]
pub struct BootConfig {
    /// Identifies the target, e.g. `"pic24fj256gb106"`.
    pub platform: &'static str,
    /// Protocol version reported to the host.
    pub version: &'static str,
    /// First address occupied by the bootloader image.
    pub bootloader_start: u32,
    /// First address of the application; must sit on an erase page
    /// boundary. The range `bootloader_start..application_start` is
    /// never writable or erasable.
    pub application_start: u32,
    /// Base of the interrupt vector table. Writes below this address
    /// are refused so the application cannot retarget the reset
    /// vector (address 0 excepted, see the dispatcher).
    pub ivt_base: u32,
    /// Words per write row.
    pub flash_row: u16,
    /// Words per erase page.
    pub flash_page: u16,
    /// Total program memory length reported to the host.
    pub program_length: u32,
    /// Words accepted per read-max/write-max transaction, at most
    /// [`MAX_PROG_WORDS`].
    pub max_prog_words: u16,
    /// Ticks the bootloader listens after reset (or after the last
    /// received byte) before launching the application.
    pub boot_window_ticks: u32,
    /// Ticks of receive silence after which a half-received frame is
    /// discarded.
    pub rx_idle_ticks: u32,
}

impl BootConfig {
    /// First two program words of flash: a jump to the bootloader
    /// entry. Rewritten whenever the zero page is touched so the
    /// device remains bootable no matter what the host uploads.
    pub const fn jump_stub(&self) -> [u32; 2] {
        [0x0004_0000 | self.bootloader_start, 0x0000_0000]
    }

    /// Address extent of the zero erase page.
    pub const fn zero_page_end(&self) -> u32 {
        (self.flash_page as u32) << 1
    }
}
