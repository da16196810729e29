//! A `chirp` radio link for Semtech SX1276/77/78/79 transceivers.
//!
//! The driver speaks to the chip over SPI using the `embedded-hal` blocking traits, keeps the
//! modem in LoRa mode with explicit headers, and polls the IRQ flag register instead of
//! waiting on a DIO interrupt pin.
//!
//! The one subtle responsibility here is [`RadioLink::poll_rx`]: the chip's 128-byte receive
//! FIFO keeps filling while the host is between polls, and the hardware only reports the
//! length of the *last* message. The driver remembers where its previous read ended and folds
//! everything between that point and the current write pointer into one linear byte run,
//! wrapping around the end of the FIFO when needed. Getting this arithmetic wrong silently
//! loses frames, which the session layer above would only notice as missing acks.

#![no_std]
#![warn(rust_2018_idioms)]

pub mod registers;

use chirp::frame::MAX_FRAME;
use chirp::radio::{RadioLink, FIFO_SIZE};
use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

use self::registers::{IrqFlags, Mode, Register};

/// Start of the transmit half of the FIFO.
const TX_BASE: u8 = 0x80;

/// Errors from the SPI transport or the chip.
#[derive(Debug)]
pub enum Error<SpiE, PinE> {
    /// SPI bus failure.
    Spi(SpiE),
    /// Chip-select pin failure.
    Pin(PinE),
    /// A linearised FIFO read did not fit the caller's buffer.
    Overflow,
}

/// Polling driver for SX127x-family transceivers.
///
/// The `RESET` line and the modem configuration registers (frequency, bandwidth, spreading
/// factor) are expected to be handled by board bring-up; the driver only manages the mode,
/// FIFO and IRQ registers it needs to move frames.
pub struct Sx127x<SPI, CS> {
    spi: SPI,
    cs: CS,
    /// Where our last FIFO read ended; the write pointer has moved on from here if more
    /// messages arrived since.
    last_fifo_idx: u8,
}

impl<SPI, CS, SpiE, PinE> Sx127x<SPI, CS>
where
    SPI: Transfer<u8, Error = SpiE> + Write<u8, Error = SpiE>,
    CS: OutputPin<Error = PinE>,
{
    pub fn new(spi: SPI, cs: CS) -> Self {
        Sx127x {
            spi,
            cs,
            last_fifo_idx: 0,
        }
    }

    /// Releases the SPI bus and chip-select pin.
    pub fn free(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    pub fn read_register(&mut self, reg: Register) -> Result<u8, Error<SpiE, PinE>> {
        self.cs.set_low().map_err(Error::Pin)?;
        let mut buffer = [reg as u8 & 0x7F, 0x00];
        let value = self.spi.transfer(&mut buffer).map_err(Error::Spi)?[1];
        self.cs.set_high().map_err(Error::Pin)?;
        Ok(value)
    }

    fn write_register(&mut self, reg: Register, byte: u8) -> Result<(), Error<SpiE, PinE>> {
        self.cs.set_low().map_err(Error::Pin)?;
        self.spi
            .write(&[reg as u8 | 0x80, byte])
            .map_err(Error::Spi)?;
        self.cs.set_high().map_err(Error::Pin)?;
        Ok(())
    }

    fn set_mode(&mut self, mode: Mode) -> Result<(), Error<SpiE, PinE>> {
        self.write_register(Register::RegOpMode, mode as u8)
    }

    fn irq_flags(&mut self) -> Result<IrqFlags, Error<SpiE, PinE>> {
        Ok(IrqFlags::from_bits_truncate(
            self.read_register(Register::RegIrqFlags)?,
        ))
    }

    fn clear_irq(&mut self) -> Result<(), Error<SpiE, PinE>> {
        self.write_register(Register::RegIrqFlags, 0xFF)
    }

    /// Returns whether a complete, plausibly-sized message is waiting in the FIFO.
    ///
    /// Timeout and payload-CRC conditions are cleared and treated as "nothing to read". A
    /// message longer than the largest frame on the bus is line noise and is discarded the
    /// same way.
    fn check_message(&mut self) -> Result<bool, Error<SpiE, PinE>> {
        let flags = self.irq_flags()?;
        if flags.contains(IrqFlags::RX_DONE | IrqFlags::VALID_HEADER) {
            let reported = self.read_register(Register::RegRxNbBytes)?;
            if usize::from(reported) > MAX_FRAME {
                self.clear_irq()?;
                return Ok(false);
            }
            return Ok(true);
        }
        if flags.intersects(IrqFlags::RX_TIMEOUT | IrqFlags::PAYLOAD_CRC_ERROR) {
            self.clear_irq()?;
        }
        Ok(false)
    }

    fn read_fifo(&mut self, start: u8, buf: &mut [u8]) -> Result<(), Error<SpiE, PinE>> {
        self.write_register(Register::RegFifoAddrPtr, start)?;
        for slot in buf.iter_mut() {
            *slot = self.read_register(Register::RegFifo)?;
        }
        Ok(())
    }
}

/// Computes where a linearised FIFO read starts and how many bytes it covers.
///
/// `reported` is the chip's length of the most recent message only. When the current write
/// pointer differs from where our previous read ended, the messages in between are folded
/// into the run; a write pointer below the remembered index means the FIFO wrapped, so the
/// run spans the tail of the FIFO plus the part rewritten from its base.
fn linearised_read(last_idx: u8, current_ptr: u8, base_ptr: u8, reported: u8) -> (u8, usize) {
    let fifo = FIFO_SIZE as u8;
    let mut len = usize::from(reported);
    let mut start = current_ptr;
    if last_idx != current_ptr {
        if current_ptr < last_idx {
            len += usize::from(fifo - last_idx) + usize::from(current_ptr - base_ptr);
        } else {
            len += usize::from(current_ptr - last_idx);
        }
        start = last_idx;
    }
    (start, len)
}

impl<SPI, CS, SpiE, PinE> RadioLink for Sx127x<SPI, CS>
where
    SPI: Transfer<u8, Error = SpiE> + Write<u8, Error = SpiE>,
    CS: OutputPin<Error = PinE>,
    SpiE: core::fmt::Debug,
    PinE: core::fmt::Debug,
{
    type Error = Error<SpiE, PinE>;

    fn init(&mut self) -> Result<(), Self::Error> {
        self.set_mode(Mode::Sleep)?;
        self.write_register(Register::RegPaConfig, 0xFF)?;
        self.write_register(Register::RegDioMapping1, 0x00)
    }

    fn set_rx_mode(&mut self) -> Result<(), Self::Error> {
        self.set_mode(Mode::Sleep)?;
        self.write_register(Register::RegFifoAddrPtr, 0x00)?;
        self.set_mode(Mode::RxContinuous)?;
        // mode changes reset the chip's receive pointer
        self.last_fifo_idx = 0;
        Ok(())
    }

    fn poll_rx(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if !self.check_message()? {
            return Ok(0);
        }
        self.clear_irq()?;

        let reported = self.read_register(Register::RegRxNbBytes)?;
        let current = self.read_register(Register::RegFifoRxCurrentAddr)?;
        let base = self.read_register(Register::RegFifoRxBaseAddr)?;

        let (start, len) = linearised_read(self.last_fifo_idx, current, base, reported);
        if len > buf.len() {
            return Err(Error::Overflow);
        }
        self.last_fifo_idx = ((usize::from(start) + len) % FIFO_SIZE) as u8;

        self.read_fifo(start, &mut buf[..len])?;
        Ok(len)
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        self.set_mode(Mode::Stdby)?;
        self.write_register(Register::RegFifoAddrPtr, TX_BASE)?;
        for &byte in frame {
            self.write_register(Register::RegFifo, byte)?;
        }
        self.write_register(Register::RegPayloadLength, frame.len() as u8)?;
        self.set_mode(Mode::Tx)?;

        while !self.irq_flags()?.contains(IrqFlags::TX_DONE) {}
        self.write_register(Register::RegIrqFlags, IrqFlags::TX_DONE.bits())?;

        self.set_rx_mode()
    }
}
