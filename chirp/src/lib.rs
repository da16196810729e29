//! A mailbox message bus over a LoRa link.
//!
//! `chirp` glues a handful of nodes (a Pi-class host, microcontrollers, other peers) together
//! through a shared radio. Each node periodically publishes a small set of typed values
//! ("mailbox entries") and consumes the values published by its peers, with end-to-end
//! acknowledgement and a global round-robin transmit schedule so only one node talks per slot.
//!
//! The crate has two layers:
//!
//! * [`frame`]: the link-layer codec. Fixed 6-byte-overhead frames over the radio FIFO, with
//!   an 8-bit checksum, a session key byte, and a decoder that copes with several back-to-back
//!   frames per poll.
//! * [`mailbox`]: the session layer. The typed publish/subscribe table, the round scheduler,
//!   the acknowledgement tracker, and the packer that fits tokens into frames.
//!
//! # Using the bus
//!
//! The core is hardware-agnostic and `no_std`: implement [`radio::RadioLink`] once per
//! transceiver (the `chirp-sx127x` crate does this for Semtech SX127x chips over SPI; the
//! in-process [`radio::sim::SimRadio`] backs tests and demos), build the shared mailbox table,
//! and drive [`mailbox::Mailbox::tick`] from your idle loop.

#![no_std]
#![warn(rust_2018_idioms)]

#[macro_use]
mod log;
mod crc;
mod error;
mod module;
mod utils;
pub mod bytes;
pub mod frame;
pub mod mailbox;
pub mod radio;

pub use self::error::Error;
pub use self::frame::PROTOCOL_VERSION;
pub use self::module::{ModuleId, Modules};
