//! Simulated programmer board and memory chip.
//!
//! Stands in for the real hardware behind the [`bus`](crate::bus) and
//! [`transport`](crate::transport) seams: line levels are latched, the
//! permuted address wiring is decoded back into a logical address, a mask
//! ROM drives the data bus only while /OE is low and its Vcc-select line is
//! high, and an EEPROM commits a byte on each /WE rising edge. Busy-wait
//! delays accumulate in a microsecond tick counter instead of sleeping, so
//! timing-dependent sequences run instantly and deterministically under test.
//!
//! The transport side models the host link's batch delivery: bytes queued
//! with [`SimTransport::send_batch`] become visible one batch at a time,
//! the way a USB CDC link hands the firmware one transfer's worth of bytes
//! per poll.

use std::collections::VecDeque;

use crate::bus::{BusMode, BusPort, DataDir, Delay, Indicator, Line};
use crate::transport::Transport;
use crate::ROM_SIZE;

/// Memory technology of the socketed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipKind {
    /// Writable, /WE-clocked, reads gated by /OE.
    Eeprom,
    /// Read-only, needs the Vcc-select line high to drive the bus.
    MaskRom,
}

impl ChipKind {
    pub fn to_byte(self) -> u8 {
        match self {
            ChipKind::Eeprom => 0,
            ChipKind::MaskRom => 1,
        }
    }

    pub fn from_byte(byte: u8) -> Option<ChipKind> {
        match byte {
            0 => Some(ChipKind::Eeprom),
            1 => Some(ChipKind::MaskRom),
            _ => None,
        }
    }
}

/// The 32 KiB device in the socket. Fresh chips read back erased (0xFF).
pub struct SimChip {
    pub kind: ChipKind,
    pub mem: Vec<u8>,
}

impl SimChip {
    pub fn new(kind: ChipKind) -> Self {
        SimChip { kind, mem: vec![0xFF; ROM_SIZE] }
    }

    /// Preload device contents starting at offset 0 (excess bytes dropped).
    pub fn load(&mut self, data: &[u8]) {
        let len = data.len().min(ROM_SIZE);
        self.mem[..len].copy_from_slice(&data[..len]);
    }
}

/// Simulated board: latched line levels, data port, tick counter, and an
/// indicator transition log.
pub struct SimBoard {
    pub chip: SimChip,
    /// Last driven level per [`Line`], indexed by declaration order.
    lines: [bool; 9],
    addr_lsb: u8,
    data_dir: DataDir,
    data_out: u8,
    led_on: bool,
    /// Indicator transitions as `(tick_us, level)`.
    led_events: Vec<(u64, bool)>,
    tick_us: u64,
}

impl SimBoard {
    pub fn new(kind: ChipKind) -> Self {
        SimBoard {
            chip: SimChip::new(kind),
            lines: [false; 9],
            addr_lsb: 0,
            data_dir: DataDir::Input,
            data_out: 0,
            led_on: false,
            led_events: Vec::new(),
            tick_us: 0,
        }
    }

    fn line(&self, line: Line) -> bool {
        self.lines[line as usize]
    }

    /// Reconstruct the logical address from the permuted line state, per
    /// mode. This is the inverse of the driver's wiring table and doubles as
    /// its bijectivity oracle.
    pub fn logical_addr(&self, mode: BusMode) -> u16 {
        let mut addr = self.addr_lsb as u16;
        let msb_wiring = [
            (8, Line::F0),
            (9, Line::F1),
            (10, Line::F4),
            (11, Line::F5),
            (12, Line::F6),
            (13, Line::F7),
        ];
        for (bit, line) in msb_wiring {
            if self.line(line) {
                addr |= 1 << bit;
            }
        }
        let top = match mode {
            BusMode::MaskRom => self.line(Line::E6),
            BusMode::Eeprom => self.line(Line::C7),
        };
        if top {
            addr |= 1 << 14;
        }
        addr
    }

    /// Peek the chip contents directly, bypassing the bus.
    pub fn raw_read(&self, addr: u16) -> u8 {
        self.chip.mem[addr as usize % ROM_SIZE]
    }

    /// Microseconds spent in busy-wait delays since construction.
    pub fn elapsed_us(&self) -> u64 {
        self.tick_us
    }

    pub fn indicator_on(&self) -> bool {
        self.led_on
    }

    /// Number of off-transitions seen on the indicator (pulses and fault
    /// blinks both start with one).
    pub fn indicator_pulses(&self) -> usize {
        self.led_events.iter().filter(|(_, on)| !on).count()
    }
}

impl BusPort for SimBoard {
    fn set_line(&mut self, line: Line, high: bool) {
        let prev = self.lines[line as usize];
        self.lines[line as usize] = high;

        // EEPROM commits the driven byte on the /WE rising edge, but only
        // while /OE is inactive and the data port is actually driven.
        if line == Line::E6
            && high
            && !prev
            && self.chip.kind == ChipKind::Eeprom
            && self.data_dir == DataDir::Output
            && self.line(Line::E2)
        {
            let addr = self.logical_addr(BusMode::Eeprom) as usize;
            self.chip.mem[addr % ROM_SIZE] = self.data_out;
        }
    }

    fn write_addr_lsb(&mut self, value: u8) {
        self.addr_lsb = value;
    }

    fn set_data_dir(&mut self, dir: DataDir) {
        self.data_dir = dir;
    }

    fn write_data(&mut self, value: u8) {
        self.data_out = value;
    }

    fn read_data(&mut self) -> u8 {
        if self.data_dir == DataDir::Output {
            // Reading the port while driving it returns our own output.
            return self.data_out;
        }
        // The chip drives the bus only while /OE is low; otherwise the bus
        // floats to the pulled-up idle state.
        if !self.line(Line::E2) {
            match self.chip.kind {
                ChipKind::MaskRom => {
                    if self.line(Line::C7) {
                        let addr = self.logical_addr(BusMode::MaskRom) as usize;
                        return self.chip.mem[addr % ROM_SIZE];
                    }
                }
                ChipKind::Eeprom => {
                    let addr = self.logical_addr(BusMode::Eeprom) as usize;
                    return self.chip.mem[addr % ROM_SIZE];
                }
            }
        }
        0xFF
    }
}

impl Delay for SimBoard {
    fn delay_us(&mut self, us: u32) {
        self.tick_us += us as u64;
    }
}

impl Indicator for SimBoard {
    fn indicator(&mut self, on: bool) {
        if on != self.led_on {
            self.led_events.push((self.tick_us, on));
            self.led_on = on;
        }
    }
}

/// In-memory host link delivering bytes in discrete batches.
pub struct SimTransport {
    inbox: VecDeque<Vec<u8>>,
    current: VecDeque<u8>,
    outbox: Vec<u8>,
    /// Report cancellation once every queued byte has been drained. Lets
    /// tests observe the write path's starvation fault instead of spinning.
    pub abort_when_starved: bool,
}

impl SimTransport {
    pub fn new() -> Self {
        SimTransport {
            inbox: VecDeque::new(),
            current: VecDeque::new(),
            outbox: Vec::new(),
            abort_when_starved: false,
        }
    }

    /// Queue one host-to-device delivery. It becomes visible only after the
    /// preceding batch has been fully drained.
    pub fn send_batch(&mut self, bytes: &[u8]) {
        self.inbox.push_back(bytes.to_vec());
    }

    /// Take and clear everything the device has sent to the host.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_output(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn has_pending_input(&self) -> bool {
        !self.current.is_empty() || !self.inbox.is_empty()
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        SimTransport::new()
    }
}

impl Transport for SimTransport {
    fn bytes_available(&mut self) -> usize {
        if self.current.is_empty() {
            if let Some(batch) = self.inbox.pop_front() {
                self.current = batch.into();
            }
        }
        self.current.len()
    }

    fn recv_byte(&mut self) -> Option<u8> {
        self.current.pop_front()
    }

    fn send(&mut self, data: &[u8]) {
        self.outbox.extend_from_slice(data);
    }

    fn cancelled(&self) -> bool {
        self.abort_when_starved && self.current.is_empty() && self.inbox.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::drive_address;

    #[test]
    fn test_address_permutation_bijective() {
        // Every logical address round-trips through the permuted wiring in
        // both modes; together with determinism this makes the per-mode
        // mapping a bijection on [0, ROM_SIZE).
        let mut board = SimBoard::new(ChipKind::MaskRom);
        for addr in 0..ROM_SIZE as u16 {
            drive_address(&mut board, addr, BusMode::MaskRom);
            assert_eq!(board.logical_addr(BusMode::MaskRom), addr);
        }
        let mut board = SimBoard::new(ChipKind::Eeprom);
        for addr in 0..ROM_SIZE as u16 {
            drive_address(&mut board, addr, BusMode::Eeprom);
            assert_eq!(board.logical_addr(BusMode::Eeprom), addr);
        }
    }

    #[test]
    fn test_mask_rom_needs_oe_and_vcc() {
        let mut board = SimBoard::new(ChipKind::MaskRom);
        board.chip.mem[0x1234] = 0x5A;
        board.set_data_dir(DataDir::Input);
        drive_address(&mut board, 0x1234, BusMode::MaskRom);

        // /OE still high: bus floats.
        board.set_line(Line::E2, true);
        assert_eq!(board.read_data(), 0xFF);

        board.set_line(Line::E2, false);
        assert_eq!(board.read_data(), 0x5A);

        // Dropping the Vcc-select line silences the ROM.
        board.set_line(Line::C7, false);
        assert_eq!(board.read_data(), 0xFF);
    }

    #[test]
    fn test_eeprom_commits_on_we_rising_edge() {
        let mut board = SimBoard::new(ChipKind::Eeprom);
        board.set_data_dir(DataDir::Output);
        board.set_line(Line::E2, true);
        board.set_line(Line::E6, true);

        drive_address(&mut board, 0x0200, BusMode::Eeprom);
        board.write_data(0xC3);

        // Holding /WE high does nothing; only the low-then-high pulse
        // latches the byte.
        assert_eq!(board.chip.mem[0x0200], 0xFF);
        board.set_line(Line::E6, false);
        assert_eq!(board.chip.mem[0x0200], 0xFF);
        board.set_line(Line::E6, true);
        assert_eq!(board.chip.mem[0x0200], 0xC3);
    }

    #[test]
    fn test_eeprom_ignores_we_while_bus_is_input() {
        let mut board = SimBoard::new(ChipKind::Eeprom);
        board.set_data_dir(DataDir::Input);
        drive_address(&mut board, 0x0010, BusMode::Eeprom);
        board.set_line(Line::E6, false);
        board.set_line(Line::E6, true);
        assert_eq!(board.chip.mem[0x0010], 0xFF);
    }

    #[test]
    fn test_eeprom_raw_bus_read() {
        // The hardware can read an EEPROM over /OE even though the firmware
        // path refuses to; the sim keeps that capability.
        let mut board = SimBoard::new(ChipKind::Eeprom);
        board.chip.mem[0x4001] = 0x77;
        board.set_data_dir(DataDir::Input);
        drive_address(&mut board, 0x4001, BusMode::Eeprom);
        board.set_line(Line::E2, false);
        assert_eq!(board.read_data(), 0x77);
    }

    #[test]
    fn test_delay_accumulates_ticks() {
        let mut board = SimBoard::new(ChipKind::Eeprom);
        board.delay_us(3);
        board.delay_ms(2);
        assert_eq!(board.elapsed_us(), 2003);
    }

    #[test]
    fn test_transport_batches_arrive_in_order() {
        let mut t = SimTransport::new();
        t.send_batch(&[1, 2]);
        t.send_batch(&[3]);

        assert_eq!(t.bytes_available(), 2);
        assert_eq!(t.recv_byte(), Some(1));
        assert_eq!(t.recv_byte(), Some(2));
        // Second batch becomes visible only once the first is drained.
        assert_eq!(t.bytes_available(), 1);
        assert_eq!(t.recv_byte(), Some(3));
        assert_eq!(t.bytes_available(), 0);
        assert_eq!(t.recv_byte(), None);
    }

    #[test]
    fn test_transport_cancellation() {
        let mut t = SimTransport::new();
        assert!(!t.cancelled());
        t.abort_when_starved = true;
        t.send_batch(&[9]);
        assert!(!t.cancelled());
        t.bytes_available();
        t.recv_byte();
        assert!(t.cancelled());
    }

    #[test]
    fn test_chip_load_clamps() {
        let mut chip = SimChip::new(ChipKind::MaskRom);
        chip.load(&vec![0x11; ROM_SIZE + 100]);
        assert_eq!(chip.mem.len(), ROM_SIZE);
        assert!(chip.mem.iter().all(|&b| b == 0x11));
    }
}
