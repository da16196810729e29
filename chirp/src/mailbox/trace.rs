//! Human-readable rendering of packed token streams.

use crate::bytes::ByteReader;
use crate::mailbox::{Entry, ACK_ID, ROUND_UPDATE_ID};
use core::fmt;

/// Renders a frame payload as the tokens the receive dispatcher would see.
///
/// This is a pure view over the payload bytes and the mailbox table, with no radio involved,
/// so traces can be produced (and asserted on) without any I/O. The engine logs one of these
/// per packed and per received payload at `trace` level.
pub struct PayloadTrace<'a> {
    payload: &'a [u8],
    entries: &'a [Entry],
}

impl<'a> PayloadTrace<'a> {
    pub fn new(payload: &'a [u8], entries: &'a [Entry]) -> Self {
        PayloadTrace { payload, entries }
    }
}

impl fmt::Display for PayloadTrace<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = ByteReader::new(self.payload);
        let mut first = true;
        while !bytes.is_empty() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;

            match bytes.read_u8() {
                Ok(ACK_ID) => match bytes.read_u8() {
                    Ok(index) => write!(f, "ack[{}]", index)?,
                    Err(_) => return f.write_str("ack[?]"),
                },
                Ok(ROUND_UPDATE_ID) => match bytes.read_u8() {
                    Ok(round) => write!(f, "round->{}", round)?,
                    Err(_) => return f.write_str("round->?"),
                },
                Ok(index) => match self.entries.get(usize::from(index)) {
                    Some(entry) => match entry.kind().read_value(&mut bytes) {
                        Ok(value) => write!(f, "data[{}]={:?}", index, value)?,
                        // the stream offset cannot be trusted past a short read
                        Err(_) => return write!(f, "data[{}]=?", index),
                    },
                    None => return write!(f, "?[{}]", index),
                },
                Err(_) => return Ok(()),
            }
        }
        Ok(())
    }
}
