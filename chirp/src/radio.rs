//! The seam between the protocol core and transceiver hardware.
//!
//! The engine and frame codec depend only on the [`RadioLink`] trait. Two implementations
//! exist: the SPI-backed SX127x driver (in its own crate) and the in-process [`sim::SimRadio`]
//! used by tests and demos.

use core::fmt;

/// Number of bytes in the transceiver's receive FIFO.
///
/// A buffer handed to [`RadioLink::poll_rx`] should hold at least twice this much, since a
/// single poll may linearise a wrapped FIFO region on top of the most recent message.
pub const FIFO_SIZE: usize = 0x80;

/// Capability the bus needs from a transceiver.
pub trait RadioLink {
    /// Transport-level failure, eg. an SPI error. Reported, never fatal to the engine.
    type Error: fmt::Debug;

    /// Brings the link into a ready state. Called once, before any other operation.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Enables receive mode.
    fn set_rx_mode(&mut self) -> Result<(), Self::Error>;

    /// Copies every byte received since the last poll into `buf`, preserving arrival order,
    /// and returns the number of bytes written.
    ///
    /// The returned run may span several frames. Implementations must linearise any FIFO
    /// wraparound internally so the caller always sees one contiguous sequence.
    fn poll_rx(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Transmits one encoded frame, blocking until the transceiver reports completion, then
    /// returns the link to receive mode.
    fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error>;
}

pub mod sim {
    //! An in-process radio for tests and demos.
    //!
    //! [`SimRadio`] has no wire at all: a harness moves the frames captured from one node's
    //! [`take_sent`](SimRadio::take_sent) into its peers' receive buffers with
    //! [`inject`](SimRadio::inject). Arrival order is preserved and injected frames
    //! concatenate, which exercises the same multi-frame decoding as a busy FIFO.

    use super::{RadioLink, FIFO_SIZE};
    use crate::frame::MAX_FRAME;
    use core::mem;
    use heapless::Vec;

    /// A buffer of the simulated radio overflowed.
    #[derive(Debug, PartialEq, Eq)]
    pub struct Overflow;

    /// Number of outgoing frames [`SimRadio`] retains until they are collected.
    pub const SENT_CAPACITY: usize = 8;

    /// A loopback radio backed by in-memory buffers.
    pub struct SimRadio {
        rx: Vec<u8, { 2 * FIFO_SIZE }>,
        sent: Vec<Vec<u8, MAX_FRAME>, SENT_CAPACITY>,
    }

    impl SimRadio {
        pub fn new() -> Self {
            SimRadio {
                rx: Vec::new(),
                sent: Vec::new(),
            }
        }

        /// Queues bytes as if they had arrived over the air since the last poll.
        pub fn inject(&mut self, bytes: &[u8]) -> Result<(), Overflow> {
            self.rx.extend_from_slice(bytes).map_err(|_| Overflow)
        }

        /// Removes and returns every frame passed to `send` so far, oldest first.
        pub fn take_sent(&mut self) -> Vec<Vec<u8, MAX_FRAME>, SENT_CAPACITY> {
            mem::take(&mut self.sent)
        }
    }

    impl Default for SimRadio {
        fn default() -> Self {
            Self::new()
        }
    }

    impl RadioLink for SimRadio {
        type Error = Overflow;

        fn init(&mut self) -> Result<(), Overflow> {
            Ok(())
        }

        fn set_rx_mode(&mut self) -> Result<(), Overflow> {
            Ok(())
        }

        fn poll_rx(&mut self, buf: &mut [u8]) -> Result<usize, Overflow> {
            if buf.len() < self.rx.len() {
                return Err(Overflow);
            }
            let n = self.rx.len();
            buf[..n].copy_from_slice(&self.rx);
            self.rx.clear();
            Ok(n)
        }

        fn send(&mut self, frame: &[u8]) -> Result<(), Overflow> {
            let mut copy = Vec::new();
            copy.extend_from_slice(frame).map_err(|_| Overflow)?;
            self.sent.push(copy).map_err(|_| Overflow)
        }
    }

}
