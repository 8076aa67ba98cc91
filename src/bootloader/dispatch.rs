//! Interprets verified messages and drives the flash capability.

use super::guard::AddressGuard;
use super::policy::BootPolicy;
use crate::config::{BootConfig, MAX_PROG_WORDS};
use crate::hal::flash::Result as FlashResult;
use crate::hal::{FlashMemory, SerialPort};
use crate::protocol::framing::FrameEncoder;
use crate::protocol::Command;

/// Value a freshly erased 24-bit program word reads back as, used to
/// pad partial rows.
const ERASED_WORD: u32 = 0x00FF_FFFF;

/// Borrowed view of the bootloader's collaborators for the duration of
/// one message.
pub(crate) struct Dispatcher<'a, S, F> {
    pub port: &'a mut S,
    pub flash: &'a mut F,
    pub encoder: &'a mut FrameEncoder,
    pub policy: &'a mut BootPolicy,
    pub config: &'a BootConfig,
    pub guard: AddressGuard,
}

impl<S: SerialPort, F: FlashMemory> Dispatcher<'_, S, F> {
    /// Handles one verified message: `[len_lo, len_hi, command,
    /// args...]`. Unknown commands, short argument lists, guard
    /// violations and flash faults all fall through silently; the host
    /// infers failure by reading back.
    pub fn handle(&mut self, message: &[u8]) {
        if message.len() < 3 {
            return;
        }
        let command = match Command::from_byte(message[2]) {
            Some(command) => command,
            None => return,
        };
        let args = &message[3..];

        match command {
            Command::ReadPlatform => {
                self.encoder
                    .send_str(self.port, command as u8, self.config.platform)
            }
            Command::ReadVersion => {
                self.encoder
                    .send_str(self.port, command as u8, self.config.version)
            }
            Command::ReadRowLen => {
                self.encoder
                    .send_u16(self.port, command as u8, self.config.flash_row)
            }
            Command::ReadPageLen => {
                self.encoder
                    .send_u16(self.port, command as u8, self.config.flash_page)
            }
            Command::ReadProgLen => {
                self.encoder
                    .send_u32s(self.port, command as u8, &[self.config.program_length])
            }
            Command::ReadMaxProgSize => {
                self.encoder
                    .send_u16(self.port, command as u8, self.config.max_prog_words)
            }
            Command::ReadAppStartAddr => {
                self.encoder
                    .send_u32s(self.port, command as u8, &[self.config.application_start])
            }
            Command::ReadBootStartAddr => {
                self.encoder
                    .send_u32s(self.port, command as u8, &[self.config.bootloader_start])
            }
            Command::ErasePage => self.erase_page(args),
            Command::ReadAddr => self.read_addr(args),
            Command::ReadMax => self.read_max(args),
            Command::WriteRow => self.write_row(args),
            Command::WriteMax => self.write_max(args),
            Command::StartApp => self.policy.force_launch(),
        }
    }

    fn erase_page(&mut self, args: &[u8]) {
        let address = match arg_addr(args) {
            Some(address) => address,
            None => return,
        };
        if !self.guard.erase_allowed(address) {
            return;
        }
        if self.flash.erase_page(address).is_err() {
            return;
        }
        // erasing the zero page wipes the entry stub; put it back
        // before anything else can go wrong
        if address < self.config.zero_page_end() {
            let _ = self.write_stub_row();
        }
    }

    fn read_addr(&mut self, args: &[u8]) {
        let address = match arg_addr(args) {
            Some(address) => address,
            None => return,
        };
        let value = self.flash.read_word(address);
        self.encoder
            .send_u32s(self.port, Command::ReadAddr as u8, &[address, value]);
    }

    fn read_max(&mut self, args: &[u8]) {
        let address = match arg_addr(args) {
            Some(address) => address,
            None => return,
        };
        let count = self.config.max_prog_words as usize;
        let mut words = [0u32; MAX_PROG_WORDS + 1];
        words[0] = address;
        for i in 0..count {
            words[i + 1] = self.flash.read_word(address + ((i as u32) << 1));
        }
        self.encoder
            .send_u32s(self.port, Command::ReadMax as u8, &words[..count + 1]);
    }

    fn write_row(&mut self, args: &[u8]) {
        let address = match arg_addr(args) {
            Some(address) => address,
            None => return,
        };
        let row_len = self.config.flash_row as usize;
        let mut words = [ERASED_WORD; MAX_PROG_WORDS];
        if unpack_words(&args[4..], &mut words[..row_len]).is_none() {
            return;
        }
        if !self.guard.write_allowed(address, address == 0) {
            return;
        }
        if address == 0 {
            self.force_stub(&mut words);
        }
        let _ = self.flash.write_row(address, &words[..row_len]);
    }

    fn write_max(&mut self, args: &[u8]) {
        let address = match arg_addr(args) {
            Some(address) => address,
            None => return,
        };
        let count = self.config.max_prog_words as usize;
        let mut words = [ERASED_WORD; MAX_PROG_WORDS];
        if unpack_words(&args[4..], &mut words[..count]).is_none() {
            return;
        }
        if address == 0 {
            self.force_stub(&mut words);
        }

        let row_len = self.config.flash_row as usize;
        for row in 0..count / row_len {
            let row_addr = address + ((row * row_len) as u32) * 2;
            if !self.guard.write_allowed(row_addr, address == 0) {
                continue;
            }
            let start = row * row_len;
            if self
                .flash
                .write_row(row_addr, &words[start..start + row_len])
                .is_err()
            {
                return;
            }
        }
    }

    fn force_stub(&self, words: &mut [u32; MAX_PROG_WORDS]) {
        let stub = self.config.jump_stub();
        words[0] = stub[0];
        words[1] = stub[1];
    }

    fn write_stub_row(&mut self) -> FlashResult<()> {
        let mut words = [ERASED_WORD; MAX_PROG_WORDS];
        self.force_stub(&mut words);
        let row_len = self.config.flash_row as usize;
        self.flash.write_row(0, &words[..row_len])
    }
}

fn arg_addr(args: &[u8]) -> Option<u32> {
    if args.len() < 4 {
        return None;
    }
    Some(u32::from_le_bytes([args[0], args[1], args[2], args[3]]))
}

/// Unpacks little-endian words from `data` into `words`, failing when
/// the message is shorter than the transaction it claims to carry.
fn unpack_words(data: &[u8], words: &mut [u32]) -> Option<()> {
    if data.len() < words.len() * 4 {
        return None;
    }
    for (i, word) in words.iter_mut().enumerate() {
        let at = i * 4;
        *word = u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::FlashError;
    use embedded_hal::serial::{Read, Write};
    use std::collections::{HashMap, VecDeque};

    struct LoopPort {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
    }

    impl LoopPort {
        fn new() -> Self {
            Self {
                rx: VecDeque::new(),
                tx: Vec::new(),
            }
        }
    }

    impl Read<u8> for LoopPort {
        type Error = ();

        fn read(&mut self) -> nb::Result<u8, ()> {
            self.rx.pop_front().ok_or(nb::Error::WouldBlock)
        }
    }

    impl Write<u8> for LoopPort {
        type Error = ();

        fn write(&mut self, byte: u8) -> nb::Result<(), ()> {
            self.tx.push(byte);
            Ok(())
        }

        fn flush(&mut self) -> nb::Result<(), ()> {
            Ok(())
        }
    }

    struct RamFlash {
        words: HashMap<u32, u32>,
        erased_pages: Vec<u32>,
        fail_writes: bool,
    }

    impl RamFlash {
        fn new() -> Self {
            Self {
                words: HashMap::new(),
                erased_pages: Vec::new(),
                fail_writes: false,
            }
        }
    }

    impl FlashMemory for RamFlash {
        fn read_word(&mut self, address: u32) -> u32 {
            *self.words.get(&address).unwrap_or(&ERASED_WORD)
        }

        fn erase_page(&mut self, address: u32) -> crate::hal::flash::Result<()> {
            self.erased_pages.push(address);
            Ok(())
        }

        fn write_row(&mut self, address: u32, words: &[u32]) -> crate::hal::flash::Result<()> {
            if self.fail_writes {
                return Err(FlashError::WriteError);
            }
            for (i, &word) in words.iter().enumerate() {
                self.words.insert(address + (i as u32) * 2, word);
            }
            Ok(())
        }
    }

    const CONFIG: BootConfig = BootConfig {
        platform: "pic24fj256gb106",
        version: "0.1",
        bootloader_start: 0x400,
        application_start: 0x1000,
        ivt_base: 0x4,
        flash_row: 4,
        flash_page: 8,
        program_length: 0x2_ABFE,
        max_prog_words: 8,
        boot_window_ticks: 100,
        rx_idle_ticks: 10,
    };

    struct Harness {
        port: LoopPort,
        flash: RamFlash,
        encoder: FrameEncoder,
        policy: BootPolicy,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                port: LoopPort::new(),
                flash: RamFlash::new(),
                encoder: FrameEncoder::new(),
                policy: BootPolicy::new(CONFIG.boot_window_ticks),
            }
        }

        fn handle(&mut self, message: &[u8]) {
            Dispatcher {
                port: &mut self.port,
                flash: &mut self.flash,
                encoder: &mut self.encoder,
                policy: &mut self.policy,
                config: &CONFIG,
                guard: AddressGuard::new(
                    CONFIG.bootloader_start,
                    CONFIG.application_start,
                    CONFIG.ivt_base,
                ),
            }
            .handle(message);
        }
    }

    fn message(command: u8, args: &[u8]) -> Vec<u8> {
        let length = (args.len() + 1) as u16;
        let mut message = length.to_le_bytes().to_vec();
        message.push(command);
        message.extend_from_slice(args);
        message
    }

    fn write_row_message(address: u32, fill: u32) -> Vec<u8> {
        let mut args = address.to_le_bytes().to_vec();
        for _ in 0..CONFIG.flash_row {
            args.extend_from_slice(&fill.to_le_bytes());
        }
        message(0x30, &args)
    }

    fn write_max_message(address: u32, fill: u32) -> Vec<u8> {
        let mut args = address.to_le_bytes().to_vec();
        for _ in 0..CONFIG.max_prog_words {
            args.extend_from_slice(&fill.to_le_bytes());
        }
        message(0x31, &args)
    }

    #[test]
    fn version_reply_is_a_nul_terminated_string() {
        let mut harness = Harness::new();
        harness.handle(&message(0x01, &[]));

        // strip framing down to the message and check the text
        let mut decoder = crate::protocol::framing::FrameDecoder::new();
        let mut decoded = None;
        for &byte in &harness.port.tx {
            if let Some(msg) = decoder.push(byte) {
                decoded = Some(msg.to_vec());
            }
        }
        let decoded = decoded.expect("reply should decode");
        assert_eq!(decoded[2], 0x01);
        assert_eq!(&decoded[3..], b"0.1\0");
    }

    #[test]
    fn geometry_replies_use_their_widths() {
        let mut harness = Harness::new();
        harness.handle(&message(0x02, &[]));
        harness.handle(&message(0x06, &[]));

        let mut decoder = crate::protocol::framing::FrameDecoder::new();
        let mut replies = Vec::new();
        for &byte in &harness.port.tx {
            if let Some(msg) = decoder.push(byte) {
                replies.push(msg.to_vec());
            }
        }
        assert_eq!(replies.len(), 2);
        // row length as u16
        assert_eq!(replies[0][2], 0x02);
        assert_eq!(&replies[0][3..], CONFIG.flash_row.to_le_bytes());
        // app start address as u32
        assert_eq!(replies[1][2], 0x06);
        assert_eq!(&replies[1][3..], CONFIG.application_start.to_le_bytes());
    }

    #[test]
    fn read_addr_echoes_address_and_word() {
        let mut harness = Harness::new();
        harness.flash.words.insert(0x1200, 0x0012_3456);
        harness.handle(&message(0x20, &0x1200u32.to_le_bytes()));

        let mut decoder = crate::protocol::framing::FrameDecoder::new();
        let mut decoded = None;
        for &byte in &harness.port.tx {
            if let Some(msg) = decoder.push(byte) {
                decoded = Some(msg.to_vec());
            }
        }
        let decoded = decoded.expect("reply should decode");
        assert_eq!(decoded[2], 0x20);
        assert_eq!(&decoded[3..7], 0x1200u32.to_le_bytes());
        assert_eq!(&decoded[7..11], 0x0012_3456u32.to_le_bytes());
    }

    #[test]
    fn erase_inside_bootloader_range_is_a_no_op() {
        let mut harness = Harness::new();
        harness.handle(&message(0x10, &0x0800u32.to_le_bytes()));
        assert!(harness.flash.erased_pages.is_empty());
        assert!(harness.port.tx.is_empty());
    }

    #[test]
    fn erase_of_zero_page_reprograms_the_stub() {
        let mut harness = Harness::new();
        harness.handle(&message(0x10, &0u32.to_le_bytes()));

        assert_eq!(harness.flash.erased_pages, [0]);
        let stub = CONFIG.jump_stub();
        assert_eq!(harness.flash.read_word(0), stub[0]);
        assert_eq!(harness.flash.read_word(2), stub[1]);
    }

    #[test]
    fn erase_elsewhere_leaves_the_stub_alone() {
        let mut harness = Harness::new();
        harness.handle(&message(0x10, &0x2000u32.to_le_bytes()));

        assert_eq!(harness.flash.erased_pages, [0x2000]);
        assert_eq!(harness.flash.read_word(0), ERASED_WORD);
    }

    #[test]
    fn write_row_inside_bootloader_range_is_a_no_op() {
        let mut harness = Harness::new();
        harness.handle(&write_row_message(0x400, 0x1111));
        assert!(harness.flash.words.is_empty());
    }

    #[test]
    fn write_row_below_ivt_base_is_refused() {
        let mut harness = Harness::new();
        harness.handle(&write_row_message(0x2, 0x1111));
        assert!(harness.flash.words.is_empty());
    }

    #[test]
    fn write_row_at_zero_forces_the_stub() {
        let mut harness = Harness::new();
        harness.handle(&write_row_message(0, 0x1111));

        let stub = CONFIG.jump_stub();
        assert_eq!(harness.flash.read_word(0), stub[0]);
        assert_eq!(harness.flash.read_word(2), stub[1]);
        // the rest of the row keeps the supplied payload
        assert_eq!(harness.flash.read_word(4), 0x1111);
        assert_eq!(harness.flash.read_word(6), 0x1111);
    }

    #[test]
    fn write_row_with_short_payload_is_dropped() {
        let mut harness = Harness::new();
        let mut args = 0x1200u32.to_le_bytes().to_vec();
        args.extend_from_slice(&[0xAA; 4]); // one word where a row is due
        harness.handle(&message(0x30, &args));
        assert!(harness.flash.words.is_empty());
    }

    #[test]
    fn write_max_programs_successive_rows() {
        let mut harness = Harness::new();
        harness.handle(&write_max_message(0x1200, 0x2222));

        // 8 words in rows of 4: two rows, 2 address units per word
        for i in 0..CONFIG.max_prog_words as u32 {
            assert_eq!(harness.flash.read_word(0x1200 + i * 2), 0x2222);
        }
    }

    #[test]
    fn write_max_at_zero_forces_the_stub_and_programs_the_rest() {
        let mut harness = Harness::new();
        harness.handle(&write_max_message(0, 0x3333));

        let stub = CONFIG.jump_stub();
        assert_eq!(harness.flash.read_word(0), stub[0]);
        assert_eq!(harness.flash.read_word(2), stub[1]);
        for i in 2..CONFIG.max_prog_words as u32 {
            assert_eq!(harness.flash.read_word(i * 2), 0x3333);
        }
    }

    #[test]
    fn write_max_skips_rows_inside_the_bootloader_range() {
        let mut harness = Harness::new();
        // rows land at 0x3F8 and 0x400; the second is protected
        harness.handle(&write_max_message(0x3F8, 0x4444));

        assert_eq!(harness.flash.read_word(0x3F8), 0x4444);
        assert_eq!(harness.flash.read_word(0x3FE), 0x4444);
        assert_eq!(harness.flash.read_word(0x400), ERASED_WORD);
        assert_eq!(harness.flash.read_word(0x406), ERASED_WORD);
    }

    #[test]
    fn start_app_latches_the_policy() {
        let mut harness = Harness::new();
        harness.handle(&message(0x40, &[]));
        assert_eq!(
            harness.policy.state(),
            crate::bootloader::policy::BootState::Running
        );
        assert!(harness.port.tx.is_empty());
    }

    #[test]
    fn unknown_command_is_silently_ignored() {
        let mut harness = Harness::new();
        harness.handle(&message(0x7E, &[0xDE, 0xAD]));
        assert!(harness.port.tx.is_empty());
        assert!(harness.flash.words.is_empty());
        assert!(harness.flash.erased_pages.is_empty());
    }

    #[test]
    fn flash_fault_stays_silent() {
        let mut harness = Harness::new();
        harness.flash.fail_writes = true;
        harness.handle(&write_row_message(0x1200, 0x5555));
        assert!(harness.port.tx.is_empty());
    }
}
