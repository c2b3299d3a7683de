//! Parallel memory bus: physical lines, capability seams, and the permuted
//! address driver.
//!
//! The target board routes the high address bits around the holes in the
//! AVR's I/O space, so the upper lines are *not* wired in ascending bit
//! order. The low 8 address bits land on one full port; logical bits 8–13
//! land on six individually named port F lines in a fixed permutation; the
//! top bit (A14) is routed differently per device technology:
//!
//! | Logical bit | EEPROM mode | Mask-ROM mode          |
//! |-------------|-------------|------------------------|
//! | 8..=13      | F0 F1 F4 F5 F6 F7 | F0 F1 F4 F5 F6 F7 |
//! | 14          | C7          | E6 (C7 held high = ROM Vcc) |
//!
//! In EEPROM mode E6 stays the active-low write-enable; in mask-ROM mode the
//! ROM has no write-enable, which frees E6 to carry A14 while C7 supplies the
//! ROM's extra Vcc. E2 is the active-low output-enable in both modes.

/// Individually driven output lines on the programmer board, named by the
/// port/pin they are bonded to. The low address byte and the data byte go
/// through whole-port operations instead ([`BusPort::write_addr_lsb`],
/// [`BusPort::write_data`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    /// High address lines (permuted, see module docs).
    F0,
    F1,
    F4,
    F5,
    F6,
    F7,
    /// A14 in EEPROM mode; ROM Vcc select in mask-ROM mode.
    C7,
    /// Output enable, active low.
    E2,
    /// Write enable (active low) in EEPROM mode; A14 in mask-ROM mode.
    E6,
}

/// Direction of the shared data port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDir {
    Input,
    Output,
}

/// Device technology on the bus. Selects how logical bit 14 is routed and
/// which control-line semantics apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    Eeprom,
    MaskRom,
}

/// Raw pin access to the address/data/control bus.
///
/// Direction registers for the address and control lines are configured once
/// at board bring-up and are not part of this seam; only the data port
/// changes direction during operation.
pub trait BusPort {
    /// Drive a single named line high or low.
    fn set_line(&mut self, line: Line, high: bool);
    /// Drive the low 8 address lines in one port write.
    fn write_addr_lsb(&mut self, value: u8);
    /// Reconfigure the shared data port direction.
    fn set_data_dir(&mut self, dir: DataDir);
    /// Drive the data port (valid only in [`DataDir::Output`]).
    fn write_data(&mut self, value: u8);
    /// Sample the data port (valid only in [`DataDir::Input`]).
    fn read_data(&mut self) -> u8;
}

/// Busy-wait delays. The firmware never yields during these windows; the
/// transport must tolerate going unpolled for their duration.
pub trait Delay {
    fn delay_us(&mut self, us: u32);
    fn delay_ms(&mut self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000));
    }
}

/// Status LED. Solid on = connected/idle, pulse = operation boundary,
/// fast blink = unrecoverable fault (driven by the fault handler).
pub trait Indicator {
    fn indicator(&mut self, on: bool);
}

/// Everything the programmer needs from the board, with the indicator pulse
/// expressed in terms of the other seams.
pub trait Board: BusPort + Delay + Indicator {
    /// Blink the indicator off for one pulse period, then back on.
    fn pulse_indicator(&mut self) {
        self.indicator(false);
        self.delay_ms(crate::INDICATOR_PULSE_MS);
        self.indicator(true);
    }
}

impl<T: BusPort + Delay + Indicator> Board for T {}

/// High address lines in driven order: logical bits 8..=13 map onto these
/// port F pins, least significant first. This table is the board wiring and
/// must not be "corrected" into ascending pin order.
const MSB_LINES: [Line; 6] = [Line::F0, Line::F1, Line::F4, Line::F5, Line::F6, Line::F7];

/// Drive the full 15-bit address onto the bus for the given mode.
///
/// Same `(addr, mode)` always produces the same line state; nothing else is
/// touched (in particular /OE and, in EEPROM mode, /WE keep their levels).
pub fn drive_address(bus: &mut impl BusPort, addr: u16, mode: BusMode) {
    bus.write_addr_lsb(addr as u8);

    let mut msb = (addr >> 8) as u8;
    for line in MSB_LINES {
        bus.set_line(line, msb & 1 != 0);
        msb >>= 1;
    }

    // msb now holds logical bit 14 in its LSB.
    match mode {
        BusMode::MaskRom => {
            // Extra Vcc for the ROM; A14 rides the freed write-enable pin.
            bus.set_line(Line::C7, true);
            bus.set_line(Line::E6, msb & 1 != 0);
        }
        BusMode::Eeprom => {
            bus.set_line(Line::C7, msb & 1 != 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal recorder: just remembers the last level per line.
    struct Recorder {
        lsb: u8,
        levels: Vec<(Line, bool)>,
    }

    impl BusPort for Recorder {
        fn set_line(&mut self, line: Line, high: bool) {
            self.levels.push((line, high));
        }
        fn write_addr_lsb(&mut self, value: u8) {
            self.lsb = value;
        }
        fn set_data_dir(&mut self, _dir: DataDir) {}
        fn write_data(&mut self, _value: u8) {}
        fn read_data(&mut self) -> u8 {
            0xFF
        }
    }

    fn level_of(rec: &Recorder, line: Line) -> Option<bool> {
        rec.levels.iter().rev().find(|(l, _)| *l == line).map(|(_, h)| *h)
    }

    #[test]
    fn test_permutation_table() {
        // Logical bit 10 (0x0400) must land on F4, not F2.
        let mut rec = Recorder { lsb: 0, levels: Vec::new() };
        drive_address(&mut rec, 0x0400, BusMode::Eeprom);
        assert_eq!(level_of(&rec, Line::F4), Some(true));
        assert_eq!(level_of(&rec, Line::F0), Some(false));
        assert_eq!(level_of(&rec, Line::F1), Some(false));
        assert_eq!(level_of(&rec, Line::F5), Some(false));
    }

    #[test]
    fn test_top_bit_routing_eeprom() {
        let mut rec = Recorder { lsb: 0, levels: Vec::new() };
        drive_address(&mut rec, 0x4000, BusMode::Eeprom);
        assert_eq!(level_of(&rec, Line::C7), Some(true));
        // E6 is /WE in EEPROM mode and must not be driven by the address path.
        assert_eq!(level_of(&rec, Line::E6), None);
    }

    #[test]
    fn test_top_bit_routing_mask_rom() {
        let mut rec = Recorder { lsb: 0, levels: Vec::new() };
        drive_address(&mut rec, 0x4000, BusMode::MaskRom);
        assert_eq!(level_of(&rec, Line::E6), Some(true));
        // C7 is always high in mask-ROM mode (ROM Vcc), even for low addresses.
        assert_eq!(level_of(&rec, Line::C7), Some(true));

        let mut rec = Recorder { lsb: 0, levels: Vec::new() };
        drive_address(&mut rec, 0x0000, BusMode::MaskRom);
        assert_eq!(level_of(&rec, Line::E6), Some(false));
        assert_eq!(level_of(&rec, Line::C7), Some(true));
    }

    #[test]
    fn test_lsb_port_write() {
        let mut rec = Recorder { lsb: 0, levels: Vec::new() };
        drive_address(&mut rec, 0x12A5, BusMode::Eeprom);
        assert_eq!(rec.lsb, 0xA5);
    }
}
