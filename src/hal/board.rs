//! Board-level capabilities: timing, boot request signals, handoff.

/// Everything the boot decision needs from the target board.
pub trait Board {
    /// Monotonic tick count since reset. The tick rate, together with
    /// `BootConfig::boot_window_ticks`, sets the real-time length of
    /// the boot window.
    fn elapsed_ticks(&self) -> u32;

    /// Level of the boot request pin. While asserted the bootloader
    /// keeps listening and never times out into the application.
    fn boot_pin_asserted(&self) -> bool;

    /// Reset-surviving boot request flag, set by the application
    /// before a deliberate reset into the bootloader. Backed by a
    /// reserved RAM word or similar on the target.
    fn read_persistent_flag(&self) -> bool;

    /// Updates the persistent flag; the bootloader clears it when it
    /// decides to launch so the request is one-shot.
    fn write_persistent_flag(&mut self, value: bool);

    /// Transfers control to the application entry point. Does not
    /// return.
    fn start_application(&mut self, address: u32) -> !;
}
