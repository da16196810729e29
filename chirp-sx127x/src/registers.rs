//! SX127x register map, as far as the bus driver needs it.

use bitflags::bitflags;

/// Registers accessed by the driver.
///
/// On the wire a read carries the address with the MSB clear, a write with the MSB set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    RegFifo = 0x00,
    RegOpMode = 0x01,
    RegPaConfig = 0x09,
    RegFifoAddrPtr = 0x0D,
    RegFifoTxBaseAddr = 0x0E,
    RegFifoRxBaseAddr = 0x0F,
    RegFifoRxCurrentAddr = 0x10,
    RegIrqFlags = 0x12,
    RegRxNbBytes = 0x13,
    RegPayloadLength = 0x22,
    RegDioMapping1 = 0x40,
}

/// Operating modes written to `RegOpMode`, with the long-range (LoRa) bit included.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Sleep = 0x80,
    Stdby = 0x81,
    Tx = 0x83,
    RxContinuous = 0x85,
}

bitflags! {
    /// Contents of `RegIrqFlags`. Writing a set bit back clears it.
    pub struct IrqFlags: u8 {
        const RX_TIMEOUT = 0x80;
        const RX_DONE = 0x40;
        const PAYLOAD_CRC_ERROR = 0x20;
        const VALID_HEADER = 0x10;
        const TX_DONE = 0x08;
    }
}
