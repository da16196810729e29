//! The typed publish/subscribe table.
//!
//! A mailbox table is a fixed array of [`Entry`] rows built once at startup. A row's position
//! in the array is its identity on the wire: data tokens name entries by index. Every peer on
//! a bus must be built from the same template, with directions flipped to its point of view.

use crate::bytes::{ByteReader, ByteWriter, ToBytes};
use crate::module::ModuleId;
use crate::Error;
use core::num::NonZeroU8;

/// A value held by a mailbox entry.
///
/// The variant is declared when the table is built and fixed for the lifetime of the entry;
/// it determines the wire encoding of the entry's data tokens.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    Int32(i32),
    Float32(f32),
    Bool(bool),
}

impl Value {
    /// The declared kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int32(_) => ValueKind::Int32,
            Value::Float32(_) => ValueKind::Float32,
            Value::Bool(_) => ValueKind::Bool,
        }
    }

    /// Number of bytes the value occupies on the wire, not counting the entry index byte.
    pub fn wire_len(&self) -> usize {
        self.kind().wire_len()
    }
}

/// Multi-byte scalars go out least significant byte first; floats travel as their IEEE-754
/// bit pattern. All peers on a bus share this byte order.
impl ToBytes for Value {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        match *self {
            Value::Int32(v) => writer.write_u32_le(v as u32),
            Value::Float32(v) => writer.write_u32_le(v.to_bits()),
            Value::Bool(v) => writer.write_u8(v as u8),
        }
    }
}

/// The kind of value an entry carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Int32,
    Float32,
    Bool,
}

impl ValueKind {
    /// Number of wire bytes a value of this kind occupies, not counting the entry index byte.
    pub fn wire_len(&self) -> usize {
        match self {
            ValueKind::Int32 | ValueKind::Float32 => 4,
            ValueKind::Bool => 1,
        }
    }

    /// Reads a value of this kind from the wire.
    ///
    /// The kind always comes from the receiving entry's declaration; it is never inferred
    /// from the bytes themselves.
    pub fn read_value(&self, bytes: &mut ByteReader<'_>) -> Result<Value, Error> {
        Ok(match self {
            ValueKind::Int32 => Value::Int32(bytes.read_u32_le()? as i32),
            ValueKind::Float32 => Value::Float32(f32::from_bits(bytes.read_u32_le()?)),
            ValueKind::Bool => Value::Bool(bytes.read_u8()? != 0),
        })
    }
}

/// How often an entry is transmitted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Rate {
    /// Event-driven: transmitted on turns where the entry's flag is set.
    Async,
    /// Periodic: transmitted on turns where the local round counter is divisible by the
    /// period.
    Every(NonZeroU8),
}

impl Rate {
    /// Shorthand for a periodic rate.
    ///
    /// # Panics
    ///
    /// Panics when `period` is zero.
    pub fn every(period: u8) -> Self {
        Rate::Every(NonZeroU8::new(period).expect("rate period must be non-zero"))
    }
}

/// Whether this node produces or consumes an entry.
///
/// Redundant with comparing the entry's source against the local module id, but it keeps
/// table templates readable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

/// One row of the mailbox table.
#[derive(Clone, Debug)]
pub struct Entry {
    value: Value,
    rate: Rate,
    flag: bool,
    direction: Direction,
    source: ModuleId,
    destination: ModuleId,
}

impl Entry {
    /// Creates a table row. The flag starts out clear.
    pub fn new(
        value: Value,
        rate: Rate,
        direction: Direction,
        source: ModuleId,
        destination: ModuleId,
    ) -> Self {
        Entry {
            value,
            rate,
            flag: false,
            direction,
            source,
            destination,
        }
    }

    /// The current value: the last received one for consumed entries, the last stored one for
    /// produced entries.
    pub fn value(&self) -> Value {
        self.value
    }

    /// The declared kind of the entry's value.
    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    /// Set by a producer to request transmission of an async entry, and by the receive path
    /// to signal that a new value arrived. Cleared by convention after service.
    pub fn flag(&self) -> bool {
        self.flag
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Module that produces this entry.
    pub fn source(&self) -> ModuleId {
        self.source
    }

    /// Module that consumes this entry.
    pub fn destination(&self) -> ModuleId {
        self.destination
    }

    pub(crate) fn set_value(&mut self, value: Value) {
        self.value = value;
    }

    pub(crate) fn set_flag(&mut self, flag: bool) {
        self.flag = flag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value) -> Value {
        let mut buf = [0; 4];
        let mut writer = ByteWriter::new(&mut buf);
        value.to_bytes(&mut writer).unwrap();
        let used = 4 - writer.space_left();
        assert_eq!(used, value.wire_len());

        let mut reader = ByteReader::new(&buf[..used]);
        let decoded = value.kind().read_value(&mut reader).unwrap();
        assert!(reader.is_empty());
        decoded
    }

    #[test]
    fn int32_round_trips() {
        for v in [0, 1, -1, 5, -559038737, i32::MIN, i32::MAX] {
            assert_eq!(round_trip(Value::Int32(v)), Value::Int32(v));
        }
    }

    #[test]
    fn bool_round_trips() {
        assert_eq!(round_trip(Value::Bool(false)), Value::Bool(false));
        assert_eq!(round_trip(Value::Bool(true)), Value::Bool(true));
    }

    #[test]
    fn float32_round_trips_bitwise() {
        for v in [0.0f32, -0.0, 5.5, core::f32::consts::PI, f32::INFINITY] {
            match round_trip(Value::Float32(v)) {
                Value::Float32(decoded) => assert_eq!(decoded.to_bits(), v.to_bits()),
                other => panic!("decoded {:?}", other),
            }
        }
    }

    #[test]
    fn nan_bit_pattern_is_preserved() {
        let nan = f32::from_bits(0x7FC0_0001);
        match round_trip(Value::Float32(nan)) {
            Value::Float32(decoded) => assert_eq!(decoded.to_bits(), 0x7FC0_0001),
            other => panic!("decoded {:?}", other),
        }
    }

    #[test]
    fn floats_travel_as_little_endian_bits() {
        let mut buf = [0; 4];
        let mut writer = ByteWriter::new(&mut buf);
        Value::Float32(5.5).to_bytes(&mut writer).unwrap();
        assert_eq!(buf, [0x00, 0x00, 0xB0, 0x40]);
    }

    #[test]
    fn kind_drives_decoding_not_the_bytes() {
        // The same four bytes decode to whatever the entry declares.
        let raw = [0x01, 0x00, 0x00, 0x00];
        let mut reader = ByteReader::new(&raw);
        assert_eq!(
            ValueKind::Int32.read_value(&mut reader).unwrap(),
            Value::Int32(1)
        );
        let mut reader = ByteReader::new(&raw);
        assert_eq!(
            ValueKind::Bool.read_value(&mut reader).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(reader.bytes_left(), 3);
    }
}
