//! # eetool-core
//!
//! Firmware core for a USB-attached programmer that reads and writes
//! byte-wide parallel EEPROM and mask-ROM devices (v0.3.0).
//!
//! The host sends short binary command frames over a byte-stream transport;
//! the core drives the permuted address/control bus, moves fixed 512-byte
//! blocks in either direction, and guards read transfers with a CRC-32
//! trailer. One device geometry is targeted: a 32 KiB address space behind
//! active-low output-enable/write-enable control, with a mask-ROM
//! voltage-select extension sharing the bus.
//!
//! ## Architecture
//!
//! - [`Programmer`] — Session context and command dispatcher owned by the
//!   main poll loop; also hosts the block transfer engine
//! - [`bus`] — Physical line names, capability seams ([`bus::BusPort`],
//!   [`bus::Delay`], [`bus::Indicator`]), and the permuted address driver
//! - [`transport`] — Byte-stream host-link seam
//! - [`crc`] — Bit-serial CRC-32 block checksum
//! - [`sim`] — Simulated board and memory chip used by tests and the
//!   loopback bench
//! - [`image`] — Compressed device-image files (`.eepi`)
//!
//! ## Failure model
//!
//! Every invariant violation is terminal: the programmer enters
//! [`State::Faulted`] and from then on only drives the indicator's fault
//! blink — no reply, no further bus activity, no recovery short of reset.
//! Silent partial writes to a device are worse than a hard stop.

pub mod bus;
pub mod crc;
pub mod image;
pub mod sim;
pub mod transport;

use thiserror::Error;

use crate::bus::{drive_address, Board, BusMode, DataDir, Line};
use crate::transport::Transport;

// Device geometry
/// Valid device addresses are `[0, ROM_SIZE)` (15-bit space).
pub const ROM_SIZE: usize = 32 * 1024;
/// Block size for every read/write transfer, and the shared buffer capacity.
pub const BLOCK_SIZE: usize = 512;
/// EEPROM page-mode write grouping. Informational for now: the engine takes
/// the slow per-byte write path, but the page computation is kept as a
/// derivable invariant (see [`page_base`]).
pub const EEPROM_PAGE_SIZE: usize = 64;
/// Mask selecting the page base address of any device address.
pub const EEPROM_PAGE_MASK: u16 = 0xFFC0;

// Framing protocol
/// First byte of every command frame, reused as the write-completion ack.
pub const PREFIX_BYTE: u8 = 0x42;
/// Liveness reply, sent without a length prefix.
pub const PING_REPLY: &[u8] = b"PONG";

// Timing (busy-waits; the transport goes unpolled during these windows)
/// Address-to-data settle after asserting /OE on a read.
pub const READ_SETTLE_US: u32 = 1;
/// Per-byte EEPROM write-cycle completion time.
pub const WRITE_CYCLE_MS: u32 = 8;
/// Breather before and after a read transfer so the host can set up.
pub const HOST_SETTLE_MS: u32 = 10;
/// Indicator off-time for an operation-boundary pulse.
pub const INDICATOR_PULSE_MS: u32 = 50;
/// Half-period of the fault handler's indicator blink.
pub const FAULT_BLINK_MS: u32 = 50;

/// Base address of the EEPROM page containing `addr`.
pub fn page_base(addr: u16) -> u16 {
    addr & EEPROM_PAGE_MASK
}

/// Host command codes (byte 1 of a frame, after the prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Ping = 1,
    StartSession = 2,
    ReadBlock = 3,
    ReadBlockMasked = 4,
    WriteBlock = 5,
}

impl Command {
    pub fn from_code(code: u8) -> Option<Command> {
        match code {
            1 => Some(Command::Ping),
            2 => Some(Command::StartSession),
            3 => Some(Command::ReadBlock),
            4 => Some(Command::ReadBlockMasked),
            5 => Some(Command::WriteBlock),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Invariant violations. All of them are terminal; none ever produces a
/// reply on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("address 0x{0:04X} outside the device address space")]
    AddressOutOfRange(u16),
    #[error("transfer index {0} past the block buffer capacity")]
    BufferOverrun(usize),
    #[error("unrecognized command code 0x{0:02X}")]
    UnknownCommand(u8),
    #[error("receive batch of {0} bytes exceeds the frame capacity")]
    ReceiveOverflow(usize),
    #[error("read transfers require the mask-ROM bus mode")]
    UnsupportedMode,
    #[error("host stopped sending mid-transfer")]
    TransferAborted,
}

/// Programmer lifecycle. `Faulted` is terminal by construction: there is no
/// transition out of it, which lets tests assert the halt without hanging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Running,
    Faulted(Fault),
}

/// Session context owned by the main loop: the pending command slot, the
/// shared 512-byte frame/transfer buffer, and the session address cursor.
///
/// Single-threaded and cooperative — at most one command is ever in flight,
/// so the buffer needs no synchronization.
pub struct Programmer<B: Board, T: Transport> {
    board: B,
    port: T,
    /// Command currently being handled; new frames are ignored while set.
    current: Option<Command>,
    /// Staging for both incoming frames and block transfers in either
    /// direction. Reused across commands, never reallocated.
    buf: [u8; BLOCK_SIZE],
    /// Next device address a block command will operate on.
    cursor: u16,
    state: State,
    /// Enable dispatch/fault diagnostics on stderr.
    pub debug: bool,
}

impl<B: Board, T: Transport> Programmer<B, T> {
    /// Bring up the bus in its quiescent state: /OE and /WE inactive,
    /// indicator off until the link comes up.
    pub fn new(mut board: B, port: T) -> Self {
        board.set_line(Line::E6, true);
        board.set_line(Line::E2, true);
        board.indicator(false);
        Programmer {
            board,
            port,
            current: None,
            buf: [0; BLOCK_SIZE],
            cursor: 0,
            state: State::Running,
            debug: false,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.state, State::Faulted(_))
    }

    /// The fault that halted the programmer, if any.
    pub fn fault(&self) -> Option<&Fault> {
        match &self.state {
            State::Faulted(f) => Some(f),
            State::Running => None,
        }
    }

    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn port_mut(&mut self) -> &mut T {
        &mut self.port
    }

    /// Transport link came up or went down. Mirrors the indicator's
    /// solid-on-while-connected contract.
    pub fn set_link_state(&mut self, up: bool) {
        self.board.indicator(up);
    }

    /// One iteration of the main loop: drain the current receive batch into
    /// the frame buffer and dispatch a command frame if one is recognized.
    ///
    /// Once faulted, each call only steps the indicator blink pattern.
    pub fn poll(&mut self) {
        if self.is_faulted() {
            self.fault_blink_step();
            return;
        }

        let avail = self.port.bytes_available();
        if avail > BLOCK_SIZE {
            // A batch that cannot fit the buffer means the host broke
            // protocol; refuse it before consuming a single byte.
            self.enter_fault(Fault::ReceiveOverflow(avail));
            return;
        }
        let count = avail.min(BLOCK_SIZE - 1);
        if count == 0 {
            return;
        }

        for i in 0..count {
            if let Some(byte) = self.port.recv_byte() {
                self.buf[i] = byte;
            }
        }

        if self.current.is_none() && self.buf[0] == PREFIX_BYTE {
            self.dispatch();
        }
    }

    fn dispatch(&mut self) {
        let code = self.buf[1];
        let Some(cmd) = Command::from_code(code) else {
            self.enter_fault(Fault::UnknownCommand(code));
            return;
        };
        self.current = Some(cmd);

        if self.debug {
            eprintln!("[eetool] {:?} cursor=0x{:04X}", cmd, self.cursor);
        }

        let result = match cmd {
            Command::Ping => {
                self.board.pulse_indicator();
                self.port.send(PING_REPLY);
                Ok(())
            }
            Command::StartSession => {
                self.cursor = 0;
                self.board.pulse_indicator();
                Ok(())
            }
            Command::ReadBlock => self.read_block(self.cursor, BLOCK_SIZE as u16, BusMode::Eeprom),
            Command::ReadBlockMasked => {
                self.read_block(self.cursor, BLOCK_SIZE as u16, BusMode::MaskRom)
            }
            Command::WriteBlock => self.write_block(self.cursor, BLOCK_SIZE as u16),
        };

        match result {
            Ok(()) => {
                if matches!(
                    cmd,
                    Command::ReadBlock | Command::ReadBlockMasked | Command::WriteBlock
                ) {
                    self.cursor = self.cursor.wrapping_add(BLOCK_SIZE as u16);
                }
                self.clear_command();
            }
            Err(fault) => self.enter_fault(fault),
        }
    }

    /// Re-arm the dispatcher: drop the pending command and spoil the frame
    /// prefix so stale buffer contents cannot be re-recognized.
    fn clear_command(&mut self) {
        self.buf[0] = 0;
        self.current = None;
    }

    fn enter_fault(&mut self, fault: Fault) {
        if self.debug {
            eprintln!("[eetool] FAULT: {}", fault);
        }
        self.state = State::Faulted(fault);
    }

    /// One half-cycle pair of the fault pattern: indicator off then on,
    /// 50 ms each. The halt loop, unrolled one step per poll.
    fn fault_blink_step(&mut self) {
        self.board.indicator(false);
        self.board.delay_ms(FAULT_BLINK_MS);
        self.board.indicator(true);
        self.board.delay_ms(FAULT_BLINK_MS);
    }

    /// Read `length` bytes starting at `start` and stream them to the host,
    /// followed by the CRC-32 of the block, least significant byte first.
    ///
    /// Only the mask-ROM mode is supported: the EEPROM-mode read path exists
    /// in the dispatch table but is wired to fault. The restriction is kept
    /// literally rather than "fixed".
    fn read_block(&mut self, start: u16, length: u16, mode: BusMode) -> Result<(), Fault> {
        if (start as usize) >= ROM_SIZE {
            return Err(Fault::AddressOutOfRange(start));
        }

        // Give the host a moment to set up before we flood it with data.
        self.board.delay_ms(HOST_SETTLE_MS);

        self.board.set_data_dir(DataDir::Input);
        self.board.set_line(Line::E2, true); // /OE inactive to start

        if mode != BusMode::MaskRom {
            self.board.set_line(Line::E6, true);
            return Err(Fault::UnsupportedMode);
        }

        for i in 0..length {
            let addr = start.wrapping_add(i);
            drive_address(&mut self.board, addr, mode);

            // Falling edge on /OE, settle, sample, release.
            self.board.set_line(Line::E2, false);
            self.board.delay_us(READ_SETTLE_US);
            let data = self.board.read_data();
            self.board.set_line(Line::E2, true);

            let index = i as usize;
            if index >= BLOCK_SIZE {
                return Err(Fault::BufferOverrun(index));
            }
            self.buf[index] = data;
        }

        self.port.send(&self.buf[..length as usize]);

        let mut crc = crc::crc32(&self.buf[..length as usize]);
        for _ in 0..4 {
            self.port.send_byte(crc as u8);
            crc >>= 8;
        }
        self.board.delay_ms(HOST_SETTLE_MS);

        self.board.pulse_indicator();
        Ok(())
    }

    /// Receive `length` bytes from the host and program them starting at
    /// `start`, one byte per write cycle, then acknowledge with the frame
    /// prefix byte.
    ///
    /// The wait for host data blocks with no timeout by design; see
    /// [`Transport::cancelled`] for the only way out.
    fn write_block(&mut self, start: u16, length: u16) -> Result<(), Fault> {
        self.board.set_data_dir(DataDir::Output);

        if start as usize + length as usize > ROM_SIZE {
            return Err(Fault::AddressOutOfRange(start));
        }

        // Never both directions at once: force /OE inactive before /WE can
        // ever pulse, and park /WE inactive.
        self.board.set_line(Line::E2, true);
        self.board.set_line(Line::E6, true);

        // Block until the host has delivered the whole block.
        let mut count: usize = 0;
        while count < length as usize {
            if self.port.cancelled() {
                return Err(Fault::TransferAborted);
            }
            let avail = self.port.bytes_available();
            for _ in 0..avail {
                if let Some(byte) = self.port.recv_byte() {
                    self.buf[count] = byte;
                }
                count += 1;
                if count >= length as usize {
                    break;
                }
            }
        }
        if count > BLOCK_SIZE {
            return Err(Fault::ReceiveOverflow(count));
        }

        for i in 0..length {
            let addr = start.wrapping_add(i);
            drive_address(&mut self.board, addr, BusMode::Eeprom);

            let index = i as usize;
            if index >= BLOCK_SIZE {
                return Err(Fault::BufferOverrun(index));
            }
            self.board.write_data(self.buf[index]);

            // Falling edge on /WE latches the byte.
            self.board.set_line(Line::E6, false);
            self.board.set_line(Line::E6, true);

            // Byte-write mode: wait out the full write cycle every byte.
            // Page-mode bursts (group by `page_base`, one wait per page)
            // would be ~64x faster but need timing windows this loop cannot
            // hit reliably, so the slow path stays.
            self.board.delay_ms(WRITE_CYCLE_MS);
        }

        // Confirm with the host that we're done.
        self.port.send_byte(PREFIX_BYTE);

        self.board.pulse_indicator();
        Ok(())
    }
}
