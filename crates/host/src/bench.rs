//! In-process loopback bench: a [`Link`](crate::Link)-compatible stream
//! wired straight into a simulated programmer.
//!
//! Writes become host-to-device batches; reads poll the device until it
//! produces output. Because everything runs on one thread, the bench flags
//! its transport to cancel blocked receives once starved — a device that
//! would hang forever on real hardware instead faults, and the pending read
//! fails with an I/O error the client can report.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use eetool_core::sim::{ChipKind, SimBoard, SimTransport};
use eetool_core::Programmer;

/// Simulated programmer plus the device-to-host byte queue.
pub struct SimBench {
    dev: Programmer<SimBoard, SimTransport>,
    rx: VecDeque<u8>,
}

impl SimBench {
    pub fn new(kind: ChipKind) -> Self {
        let mut dev = Programmer::new(SimBoard::new(kind), SimTransport::new());
        dev.set_link_state(true);
        dev.port_mut().abort_when_starved = true;
        SimBench { dev, rx: VecDeque::new() }
    }

    pub fn device(&self) -> &Programmer<SimBoard, SimTransport> {
        &self.dev
    }

    pub fn device_mut(&mut self) -> &mut Programmer<SimBoard, SimTransport> {
        &mut self.dev
    }

    /// Direct view of the simulated chip contents.
    pub fn chip_mem(&self) -> &[u8] {
        &self.dev.board().chip.mem
    }

    /// Preload the simulated chip, as if a programmed part were socketed.
    pub fn load_chip(&mut self, data: &[u8]) {
        self.dev.board_mut().chip.load(data);
    }
}

impl Write for SimBench {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.dev.port_mut().send_batch(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for SimBench {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if !self.rx.is_empty() {
                break;
            }
            self.rx.extend(self.dev.port_mut().take_output());
            if !self.rx.is_empty() {
                break;
            }
            if self.dev.is_faulted() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "device faulted; no reply will come",
                ));
            }
            if !self.dev.port_mut().has_pending_input() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "device idle with no reply pending",
                ));
            }
            self.dev.poll();
        }

        let n = buf.len().min(self.rx.len());
        for slot in buf[..n].iter_mut() {
            if let Some(byte) = self.rx.pop_front() {
                *slot = byte;
            }
        }
        Ok(n)
    }
}
