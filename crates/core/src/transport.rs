//! Host-link seam: a byte-stream transport with non-blocking primitives.
//!
//! USB enumeration, endpoint setup, and interrupt plumbing live behind this
//! trait; the core only ever sees a stream of bytes in each direction. The
//! receive side is polled — [`Transport::bytes_available`] reports how many
//! bytes the current delivery holds and [`Transport::recv_byte`] drains them
//! one at a time.

pub trait Transport {
    /// Number of received bytes ready to be drained right now.
    fn bytes_available(&mut self) -> usize;

    /// Take one received byte, `None` if the receive side is empty.
    fn recv_byte(&mut self) -> Option<u8>;

    /// Queue a buffer for transmission to the host.
    fn send(&mut self, data: &[u8]);

    /// Queue a single byte for transmission to the host.
    fn send_byte(&mut self, byte: u8) {
        self.send(&[byte]);
    }

    /// Cancellation hook for the blocking block-receive wait.
    ///
    /// On hardware the wait has no timeout and this stays `false` forever; a
    /// test transport may return `true` once it has nothing further to
    /// deliver, turning an otherwise-infinite stall into a fault the caller
    /// can observe.
    fn cancelled(&self) -> bool {
        false
    }
}
