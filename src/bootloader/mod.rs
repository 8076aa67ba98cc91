//! Bootloader control loop: listen, reprogram, hand off.

mod dispatch;
pub mod guard;
pub mod policy;

pub use guard::AddressGuard;
pub use policy::{BootPolicy, BootState};

use crate::config::BootConfig;
use crate::hal::{Board, FlashMemory, SerialPort, Watchdog};
use crate::protocol::framing::{FrameDecoder, FrameEncoder};
use dispatch::Dispatcher;

/// The bootloader proper. Owns the serial link, the flash capability
/// and the board glue for its whole life; one instance per boot cycle.
pub struct Bootloader<S, F, B, W> {
    port: S,
    flash: F,
    board: B,
    watchdog: W,
    config: BootConfig,
    guard: AddressGuard,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    policy: BootPolicy,
    last_rx_ticks: u32,
}

impl<S, F, B, W> Bootloader<S, F, B, W>
where
    S: SerialPort,
    F: FlashMemory,
    B: Board,
    W: Watchdog,
{
    pub fn new(port: S, flash: F, board: B, watchdog: W, config: BootConfig) -> Self {
        Self {
            port,
            flash,
            board,
            watchdog,
            guard: AddressGuard::new(
                config.bootloader_start,
                config.application_start,
                config.ivt_base,
            ),
            decoder: FrameDecoder::new(),
            encoder: FrameEncoder::new(),
            policy: BootPolicy::new(config.boot_window_ticks),
            last_rx_ticks: 0,
            config,
        }
    }

    /// One cooperative iteration: feed the watchdog, drain whatever
    /// has arrived through the decoder (dispatching any completed
    /// message), then evaluate the boot decision. Never blocks.
    ///
    /// Returns the application entry address once the policy settles
    /// on launching; [`run`](Self::run) turns that into the actual
    /// handoff.
    pub fn poll(&mut self) -> Option<u32> {
        self.watchdog.feed();
        let now = self.board.elapsed_ticks();

        while let Some(byte) = self.port.try_read_byte() {
            self.policy.note_activity(now);
            self.last_rx_ticks = now;
            if let Some(message) = self.decoder.push(byte) {
                Dispatcher {
                    port: &mut self.port,
                    flash: &mut self.flash,
                    encoder: &mut self.encoder,
                    policy: &mut self.policy,
                    config: &self.config,
                    guard: self.guard,
                }
                .handle(message);
            }
        }

        // a frame the host abandoned mid-transfer would otherwise sit
        // in the decoder until the next start marker
        if self.decoder.in_frame()
            && now.wrapping_sub(self.last_rx_ticks) > self.config.rx_idle_ticks
        {
            self.decoder.reset();
        }

        let hold = self.board.boot_pin_asserted() || self.board.read_persistent_flag();
        if self.policy.update(now, hold) == BootState::Running {
            // the stay-in-bootloader request is one-shot
            self.board.write_persistent_flag(false);
            Some(self.config.application_start)
        } else {
            None
        }
    }

    /// Polls until the boot decision falls, then transfers control to
    /// the application.
    pub fn run(mut self) -> ! {
        loop {
            if let Some(address) = self.poll() {
                self.board.start_application(address);
            }
        }
    }
}
