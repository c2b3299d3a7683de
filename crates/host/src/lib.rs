//! # eetool-host
//!
//! Host-side client for the eetool parallel EEPROM programmer (v0.3.0).
//!
//! Speaks the two-byte command framing over any `Read + Write` byte stream —
//! a CDC serial port device node in the field, the in-process
//! [`bench::SimBench`] under test — and layers whole-device dump/burn loops
//! on top of the per-block commands.
//!
//! ## Architecture
//!
//! - [`Link`] — Framed client: ping, session start, block read with CRC
//!   verification, block write with ack
//! - [`bench`] — Loopback bench wiring a [`Link`] to a simulated programmer
//!
//! The device never reports errors: an invariant violation halts it
//! silently. On this side that surfaces as an I/O error or short read on the
//! next reply, which is why every reply here is length- and
//! content-checked.

pub mod bench;

use std::io::{Read, Write};

use eetool_core::crc::crc32;
use eetool_core::{Command, BLOCK_SIZE, PING_REPLY, PREFIX_BYTE, ROM_SIZE};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("block checksum mismatch: device sent {sent:08X}, computed {computed:08X}")]
    ChecksumMismatch { sent: u32, computed: u32 },
    #[error("unexpected write acknowledgement byte 0x{0:02X}")]
    UnexpectedAck(u8),
    #[error("bad ping reply {0:?}")]
    BadPingReply(Vec<u8>),
    #[error("image of {0} bytes exceeds the device address space")]
    ImageTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, HostError>;

/// Framed client session over a programmer link.
pub struct Link<S: Read + Write> {
    stream: S,
    /// Enable per-block progress diagnostics on stderr.
    pub debug: bool,
}

impl<S: Read + Write> Link<S> {
    pub fn new(stream: S) -> Self {
        Link { stream, debug: false }
    }

    /// Give the underlying stream back, e.g. to inspect a bench.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn command(&mut self, cmd: Command) -> Result<()> {
        self.stream.write_all(&[PREFIX_BYTE, cmd.code()])?;
        self.stream.flush()?;
        Ok(())
    }

    /// Liveness check; verifies the fixed reply text.
    pub fn ping(&mut self) -> Result<()> {
        self.command(Command::Ping)?;
        let mut reply = [0u8; 4];
        self.stream.read_exact(&mut reply)?;
        if reply[..] != *PING_REPLY {
            return Err(HostError::BadPingReply(reply.to_vec()));
        }
        Ok(())
    }

    /// Rewind the device's address cursor to 0.
    pub fn start_session(&mut self) -> Result<()> {
        self.command(Command::StartSession)
    }

    /// Read the next 512-byte block and verify its CRC-32 trailer.
    pub fn read_block_masked(&mut self) -> Result<Vec<u8>> {
        self.command(Command::ReadBlockMasked)?;

        let mut block = vec![0u8; BLOCK_SIZE];
        self.stream.read_exact(&mut block)?;
        let mut trailer = [0u8; 4];
        self.stream.read_exact(&mut trailer)?;

        let sent = u32::from_le_bytes(trailer);
        let computed = crc32(&block);
        if sent != computed {
            return Err(HostError::ChecksumMismatch { sent, computed });
        }
        Ok(block)
    }

    /// Write one 512-byte block at the device's cursor and wait for the ack.
    ///
    /// Blocks for the device's programming time — roughly four seconds per
    /// block at the byte-write cycle rate.
    pub fn write_block(&mut self, data: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.command(Command::WriteBlock)?;
        self.stream.write_all(data)?;
        self.stream.flush()?;

        let mut ack = [0u8; 1];
        self.stream.read_exact(&mut ack)?;
        if ack[0] != PREFIX_BYTE {
            return Err(HostError::UnexpectedAck(ack[0]));
        }
        Ok(())
    }

    /// Dump `blocks` consecutive blocks starting from address 0.
    pub fn dump(&mut self, blocks: usize) -> Result<Vec<u8>> {
        self.start_session()?;
        let mut out = Vec::with_capacity(blocks * BLOCK_SIZE);
        for n in 0..blocks {
            let block = self.read_block_masked()?;
            if self.debug {
                eprintln!("[eetool] read block {}/{}", n + 1, blocks);
            }
            out.extend_from_slice(&block);
        }
        Ok(out)
    }

    /// Burn an image starting at address 0, padding the final partial block
    /// with the erased value 0xFF.
    pub fn burn(&mut self, image: &[u8]) -> Result<()> {
        if image.len() > ROM_SIZE {
            return Err(HostError::ImageTooLarge(image.len()));
        }
        self.start_session()?;

        let blocks = image.len().div_ceil(BLOCK_SIZE);
        for n in 0..blocks {
            let mut block = [0xFFu8; BLOCK_SIZE];
            let start = n * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE).min(image.len());
            block[..end - start].copy_from_slice(&image[start..end]);
            self.write_block(&block)?;
            if self.debug {
                eprintln!("[eetool] wrote block {}/{}", n + 1, blocks);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::SimBench;
    use eetool_core::sim::ChipKind;
    use eetool_core::Fault;
    use std::collections::VecDeque;

    /// Stream with scripted receive bytes and a captured transmit log.
    struct Canned {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
    }

    impl Canned {
        fn new(rx: &[u8]) -> Self {
            Canned { rx: rx.iter().copied().collect(), tx: Vec::new() }
        }
    }

    impl Read for Canned {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.rx.len());
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "script exhausted",
                ));
            }
            for slot in buf[..n].iter_mut() {
                *slot = self.rx.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for Canned {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_ping_loopback() {
        let mut link = Link::new(SimBench::new(ChipKind::MaskRom));
        link.ping().unwrap();
    }

    #[test]
    fn test_dump_loopback() {
        let mut bench = SimBench::new(ChipKind::MaskRom);
        let pattern: Vec<u8> = (0..ROM_SIZE).map(|i| (i * 3 + 1) as u8).collect();
        bench.load_chip(&pattern);

        let mut link = Link::new(bench);
        let dump = link.dump(ROM_SIZE / BLOCK_SIZE).unwrap();
        assert_eq!(dump, pattern);
    }

    #[test]
    fn test_burn_loopback() {
        let pattern: Vec<u8> = (0..ROM_SIZE).map(|i| (i ^ (i >> 7)) as u8).collect();
        let mut link = Link::new(SimBench::new(ChipKind::Eeprom));
        link.burn(&pattern).unwrap();

        let bench = link.into_inner();
        assert_eq!(bench.chip_mem(), &pattern[..]);
    }

    #[test]
    fn test_burn_pads_final_block() {
        let image = vec![0x21u8; BLOCK_SIZE + 10];
        let mut link = Link::new(SimBench::new(ChipKind::Eeprom));
        link.burn(&image).unwrap();

        let bench = link.into_inner();
        assert_eq!(&bench.chip_mem()[..image.len()], &image[..]);
        assert!(bench.chip_mem()[image.len()..2 * BLOCK_SIZE].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_burn_rejects_oversize_image() {
        let mut link = Link::new(SimBench::new(ChipKind::Eeprom));
        let err = link.burn(&vec![0u8; ROM_SIZE + 1]).unwrap_err();
        assert!(matches!(err, HostError::ImageTooLarge(_)));
    }

    #[test]
    fn test_dump_past_end_surfaces_device_fault() {
        // Asking for one block too many silently halts the device; the
        // client sees the missing reply as an I/O error.
        let mut link = Link::new(SimBench::new(ChipKind::MaskRom));
        let err = link.dump(ROM_SIZE / BLOCK_SIZE + 1).unwrap_err();
        assert!(matches!(err, HostError::Io(_)));

        let bench = link.into_inner();
        assert_eq!(
            bench.device().fault(),
            Some(&Fault::AddressOutOfRange(ROM_SIZE as u16))
        );
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let mut reply = vec![0u8; BLOCK_SIZE];
        reply[0] = 0x55;
        // Correct CRC for a zero block, wrong for this one.
        reply.extend_from_slice(&0xB2AA7578u32.to_le_bytes());
        let mut link = Link::new(Canned::new(&reply));
        let err = link.read_block_masked().unwrap_err();
        assert!(matches!(err, HostError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_unexpected_ack_detected() {
        let mut link = Link::new(Canned::new(&[0x00]));
        let err = link.write_block(&[0u8; BLOCK_SIZE]).unwrap_err();
        assert!(matches!(err, HostError::UnexpectedAck(0x00)));
    }

    #[test]
    fn test_bad_ping_reply_detected() {
        let mut link = Link::new(Canned::new(b"NOPE"));
        let err = link.ping().unwrap_err();
        assert!(matches!(err, HostError::BadPingReply(_)));
    }

    #[test]
    fn test_command_frame_bytes() {
        let mut link = Link::new(Canned::new(b"PONG"));
        link.ping().unwrap();
        let canned = link.into_inner();
        assert_eq!(canned.tx, [PREFIX_BYTE, Command::Ping.code()]);
    }
}
