//! The frame protocol: a link-layer codec between payloads and the radio FIFO.
//!
//! Every exchange on the bus is a frame with this layout:
//!
//! ```notrust
//! +-------------+----------+----------+--------------+----------+----------------+----------+
//! | destination |  source  |   pad    | version/size |   key    |    payload     |   crc    |
//! |  (1 byte)   | (1 byte) | (1 byte) |   (1 byte)   | (1 byte) | (0..=10 bytes) | (1 byte) |
//! +-------------+----------+----------+--------------+----------+----------------+----------+
//! ```
//!
//! The version/size byte carries the protocol version in its high nibble and the payload
//! length in its low nibble; the pad byte is reserved and always zero. The CRC-8 covers every
//! byte before it.
//!
//! The radio FIFO can accumulate several frames between polls, so decoding operates on a byte
//! *stream*: [`FrameCodec::decode_stream`] walks back-to-back frames, skips frames addressed
//! to other modules, and tolerates a truncated tail.

use crate::bytes::{ByteReader, ByteWriter, FromBytes, ToBytes};
use crate::crc::crc8;
use crate::module::{ModuleId, Modules};
use crate::Error;
use core::{cmp, fmt};

/// Protocol version carried in the high nibble of every frame.
pub const PROTOCOL_VERSION: u8 = 2;

/// Maximum number of payload bytes one frame can carry.
pub const MAX_PAYLOAD: usize = 10;

/// Header and checksum bytes surrounding the payload.
pub const FRAME_OVERHEAD: usize = 6;

/// Size of the largest possible frame on the wire.
pub const MAX_FRAME: usize = FRAME_OVERHEAD + MAX_PAYLOAD;

const HEADER_LEN: usize = 5;

/// The 5-byte header preceding a frame's payload.
#[derive(Copy, Clone)]
pub struct Header {
    destination: ModuleId,
    source: ModuleId,
    version_size: u8,
    key: u8,
}

impl Header {
    /// Creates a header for a frame from `source` to `destination` carrying `size` payload
    /// bytes under the session key `key`.
    pub fn new(destination: ModuleId, source: ModuleId, size: u8, key: u8) -> Self {
        Header {
            destination,
            source,
            version_size: (PROTOCOL_VERSION << 4) | (size & 0x0F),
            key,
        }
    }

    /// Module the frame is addressed to.
    pub fn destination(&self) -> ModuleId {
        self.destination
    }

    /// Module that sent the frame.
    pub fn source(&self) -> ModuleId {
        self.source
    }

    /// Protocol version from the high nibble.
    pub fn version(&self) -> u8 {
        self.version_size >> 4
    }

    /// Payload length from the low nibble.
    pub fn payload_length(&self) -> u8 {
        self.version_size & 0x0F
    }

    /// The session key the frame was sent under.
    pub fn key(&self) -> u8 {
        self.key
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("destination", &self.destination)
            .field("source", &self.source)
            .field("version", &self.version())
            .field("payload_length", &self.payload_length())
            .field("key", &self.key)
            .finish()
    }
}

impl<'a> FromBytes<'a> for Header {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let destination = ModuleId::new(bytes.read_u8()?);
        let source = ModuleId::new(bytes.read_u8()?);
        let _pad = bytes.read_u8()?;
        let version_size = bytes.read_u8()?;
        let key = bytes.read_u8()?;
        Ok(Header {
            destination,
            source,
            version_size,
            key,
        })
    }
}

impl ToBytes for Header {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.destination.raw())?;
        writer.write_u8(self.source.raw())?;
        writer.write_u8(0x00)?; // pad, reserved
        writer.write_u8(self.version_size)?;
        writer.write_u8(self.key)
    }
}

/// Encoder and decoder for the frames exchanged with the radio.
///
/// Owns the local module id, the set of peers, and the current session key. Frames arriving
/// under a different key are still surfaced, but marked invalid.
pub struct FrameCodec {
    local: ModuleId,
    modules: Modules,
    key: u8,
}

impl FrameCodec {
    /// Creates a codec for the module `local` on the bus described by `modules`.
    ///
    /// The session key starts out as `0x00`.
    pub fn new(local: ModuleId, modules: Modules) -> Self {
        FrameCodec {
            local,
            modules,
            key: 0x00,
        }
    }

    /// The module this codec encodes and filters for.
    pub fn local(&self) -> ModuleId {
        self.local
    }

    /// The module set of the bus.
    pub fn modules(&self) -> Modules {
        self.modules
    }

    /// The current session key.
    pub fn key(&self) -> u8 {
        self.key
    }

    /// Replaces the session key. All peers must switch in lockstep.
    pub fn set_key(&mut self, key: u8) {
        self.key = key;
    }

    /// Encodes `payload` as one frame addressed to `destination` and returns the encoded
    /// bytes, borrowed from `buf`.
    ///
    /// Refuses payloads longer than [`MAX_PAYLOAD`] and destinations that name neither a
    /// module of the bus nor the broadcast id.
    pub fn encode<'a>(
        &self,
        payload: &[u8],
        destination: ModuleId,
        buf: &'a mut [u8],
    ) -> Result<&'a [u8], Error> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLong);
        }
        if !self.modules.contains(destination) && destination != self.modules.broadcast() {
            return Err(Error::InvalidDestination);
        }
        let total = FRAME_OVERHEAD + payload.len();
        if buf.len() < total {
            return Err(Error::Eof);
        }

        let mut writer = ByteWriter::new(buf);
        Header::new(destination, self.local, payload.len() as u8, self.key).to_bytes(&mut writer)?;
        writer.write_slice(payload)?;

        buf[total - 1] = crc8(&buf[..total - 1]);
        Ok(&buf[..total])
    }

    /// Splits a raw byte sequence from the radio into the frames it contains.
    ///
    /// The cursor advances one whole frame at a time, using each frame's size nibble. Frames
    /// addressed to other modules are skipped silently. Frames addressed to us whose key,
    /// version or checksum do not match (including a truncated frame at the end of the
    /// sequence) are yielded with `valid` unset. Parsing stops when less than a minimal
    /// frame remains.
    pub fn decode_stream<'a>(&self, raw: &'a [u8]) -> FrameIter<'a> {
        FrameIter {
            local: self.local,
            broadcast: self.modules.broadcast(),
            key: self.key,
            rest: raw,
        }
    }
}

/// One frame extracted from a receive stream.
#[derive(Copy, Clone, Debug)]
pub struct RxFrame<'a> {
    /// Module that sent the frame.
    pub source: ModuleId,
    /// Payload bytes between the header and the checksum.
    pub payload: &'a [u8],
    /// Whether key, version and checksum all matched.
    pub valid: bool,
}

/// Iterator over the frames in a receive stream, returned by [`FrameCodec::decode_stream`].
pub struct FrameIter<'a> {
    local: ModuleId,
    broadcast: ModuleId,
    key: u8,
    rest: &'a [u8],
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = RxFrame<'a>;

    fn next(&mut self) -> Option<RxFrame<'a>> {
        while self.rest.len() >= FRAME_OVERHEAD {
            let size = usize::from(self.rest[3] & 0x0F);
            let total = FRAME_OVERHEAD + size;
            let frame = &self.rest[..cmp::min(total, self.rest.len())];
            self.rest = &self.rest[frame.len()..];

            let destination = ModuleId::new(frame[0]);
            if destination != self.local && destination != self.broadcast {
                continue;
            }

            let complete = frame.len() == total;
            let valid = complete
                && frame[4] == self.key
                && frame[3] >> 4 == PROTOCOL_VERSION
                && frame[total - 1] == crc8(&frame[..total - 1]);
            let payload = if complete {
                &frame[HEADER_LEN..total - 1]
            } else {
                &frame[HEADER_LEN..]
            };

            return Some(RxFrame {
                source: ModuleId::new(frame[1]),
                payload,
                valid,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    fn codec(local: u8) -> FrameCodec {
        FrameCodec::new(ModuleId::new(local), Modules::new(3))
    }

    fn frames<'a>(codec: &FrameCodec, raw: &'a [u8]) -> Vec<RxFrame<'a>, 8> {
        codec.decode_stream(raw).collect()
    }

    #[test]
    fn header_round_trips() {
        let header = Header::new(ModuleId::new(4), ModuleId::new(1), 7, 0x5A);
        let mut raw = [0; HEADER_LEN];
        header.to_bytes(&mut ByteWriter::new(&mut raw)).unwrap();
        assert_eq!(raw, [0x04, 0x01, 0x00, 0x27, 0x5A]);

        let parsed = Header::from_bytes(&mut ByteReader::new(&raw)).unwrap();
        assert_eq!(parsed.destination(), ModuleId::new(4));
        assert_eq!(parsed.source(), ModuleId::new(1));
        assert_eq!(parsed.version(), PROTOCOL_VERSION);
        assert_eq!(parsed.payload_length(), 7);
        assert_eq!(parsed.key(), 0x5A);
    }

    #[test]
    fn round_trip_all_sizes() {
        let payload = [0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE, 0x0F, 0xF0];
        for len in 0..=MAX_PAYLOAD {
            let mut buf = [0; MAX_FRAME];
            let tx = codec(1);
            let frame = tx.encode(&payload[..len], ModuleId::new(0), &mut buf).unwrap();
            assert_eq!(frame.len(), FRAME_OVERHEAD + len);

            let rx = frames(&codec(0), frame);
            assert_eq!(rx.len(), 1);
            assert!(rx[0].valid);
            assert_eq!(rx[0].source, ModuleId::new(1));
            assert_eq!(rx[0].payload, &payload[..len]);
        }
    }

    #[test]
    fn crc_catches_any_single_bit_flip() {
        let mut buf = [0; MAX_FRAME];
        let frame = codec(1)
            .encode(&[0xDE, 0xAD, 0xBE], ModuleId::new(0), &mut buf)
            .unwrap();
        let len = frame.len();

        for byte in 0..len {
            for bit in 0..8 {
                let mut corrupted = [0; MAX_FRAME];
                corrupted[..len].copy_from_slice(&buf[..len]);
                corrupted[byte] ^= 1 << bit;

                // Depending on where the flip lands the frame is either rejected outright
                // (destination no longer ours, size nibble changed) or surfaced as invalid.
                // It must never come back as a valid frame.
                for frame in codec(0).decode_stream(&corrupted[..len]) {
                    assert!(!frame.valid, "flip of byte {} bit {} went unnoticed", byte, bit);
                }
            }
        }
    }

    #[test]
    fn wrong_key_is_surfaced_but_invalid() {
        let mut tx = codec(1);
        tx.set_key(0x5A);
        let mut buf = [0; MAX_FRAME];
        let frame = tx.encode(&[1, 2], ModuleId::new(0), &mut buf).unwrap();

        let rx = frames(&codec(0), frame);
        assert_eq!(rx.len(), 1);
        assert!(!rx[0].valid);

        let mut matching = codec(0);
        matching.set_key(0x5A);
        assert!(frames(&matching, frame)[0].valid);
    }

    #[test]
    fn wrong_version_is_invalid() {
        let mut buf = [0; MAX_FRAME];
        let len = {
            let frame = codec(1).encode(&[7], ModuleId::new(0), &mut buf).unwrap();
            frame.len()
        };
        // rewrite the version nibble and fix up the checksum
        buf[3] = (1 << 4) | (buf[3] & 0x0F);
        buf[len - 1] = crate::crc::crc8(&buf[..len - 1]);

        let rx = frames(&codec(0), &buf[..len]);
        assert_eq!(rx.len(), 1);
        assert!(!rx[0].valid);
    }

    #[test]
    fn foreign_destination_is_skipped() {
        let mut buf = [0; MAX_FRAME];
        let frame = codec(1).encode(&[1, 2, 3], ModuleId::new(2), &mut buf).unwrap();
        assert!(frames(&codec(0), frame).is_empty());
    }

    #[test]
    fn broadcast_is_accepted_by_everyone() {
        let tx = codec(1);
        let broadcast = tx.modules().broadcast();
        let mut buf = [0; MAX_FRAME];
        let frame = tx.encode(&[9], broadcast, &mut buf).unwrap();

        for local in 0..3 {
            let rx = frames(&codec(local), frame);
            assert_eq!(rx.len(), 1);
            assert!(rx[0].valid);
        }
    }

    #[test]
    fn back_to_back_frames_decode_in_order() {
        let tx = codec(1);
        let mut buf = [0; 2 * MAX_FRAME];
        let first = tx.encode(&[0xAA], ModuleId::new(0), &mut buf).unwrap().len();
        let second = tx
            .encode(&[0xBB, 0xCC], ModuleId::new(0), &mut buf[first..])
            .unwrap()
            .len();

        let rx = frames(&codec(0), &buf[..first + second]);
        assert_eq!(rx.len(), 2);
        assert_eq!(rx[0].payload, &[0xAA]);
        assert_eq!(rx[1].payload, &[0xBB, 0xCC]);
        assert!(rx[0].valid && rx[1].valid);
    }

    #[test]
    fn foreign_frame_between_two_of_ours_is_stepped_over() {
        let tx = codec(1);
        let mut buf = [0; 3 * MAX_FRAME];
        let mut end = tx.encode(&[0x01], ModuleId::new(0), &mut buf).unwrap().len();
        end += tx
            .encode(&[0x02, 0x03, 0x04], ModuleId::new(2), &mut buf[end..])
            .unwrap()
            .len();
        end += tx.encode(&[0x05], ModuleId::new(0), &mut buf[end..]).unwrap().len();

        let rx = frames(&codec(0), &buf[..end]);
        assert_eq!(rx.len(), 2);
        assert_eq!(rx[0].payload, &[0x01]);
        assert_eq!(rx[1].payload, &[0x05]);
    }

    #[test]
    fn trailing_garbage_yields_no_second_frame() {
        let tx = codec(1);
        for extra in 1..=5 {
            let mut buf = [0; MAX_FRAME + 5];
            let len = tx.encode(&[0x42], ModuleId::new(0), &mut buf).unwrap().len();
            for i in 0..extra {
                buf[len + i] = 0xA5;
            }

            let rx = frames(&codec(0), &buf[..len + extra]);
            assert_eq!(rx.len(), 1);
            assert!(rx[0].valid);
        }
    }

    #[test]
    fn truncated_frame_for_us_is_invalid() {
        let tx = codec(1);
        let mut buf = [0; MAX_FRAME];
        let len = tx
            .encode(&[1, 2, 3, 4, 5], ModuleId::new(0), &mut buf)
            .unwrap()
            .len();

        let rx = frames(&codec(0), &buf[..len - 3]);
        assert_eq!(rx.len(), 1);
        assert!(!rx[0].valid);
    }

    #[test]
    fn encode_refuses_oversized_payload() {
        let mut buf = [0; 32];
        let err = codec(0).encode(&[0; MAX_PAYLOAD + 1], ModuleId::new(1), &mut buf);
        assert_eq!(err.unwrap_err(), Error::PayloadTooLong);
    }

    #[test]
    fn encode_refuses_unknown_destination() {
        let mut buf = [0; MAX_FRAME];
        let tx = codec(0);
        // one past the last module is *not* the broadcast id
        let err = tx.encode(&[1], ModuleId::new(3), &mut buf);
        assert_eq!(err.unwrap_err(), Error::InvalidDestination);
        assert!(tx.encode(&[1], ModuleId::new(4), &mut buf).is_ok());
    }
}
