//! The mailbox engine: a session layer on top of the frame protocol.
//!
//! Every node on the bus owns the same statically-indexed table of typed [`Entry`] rows. The
//! engine transmits the entries this node produces, writes received values into the entries it
//! consumes, acknowledges every received data token, and keeps the global round-robin schedule
//! moving: only the module whose id equals the current round transmits, and a round-update
//! token hands the turn to the next module.
//!
//! One engine instance is driven by an external loop calling [`Mailbox::tick`] at a fixed
//! cadence (2 Hz in the reference setup; the exact rate is not critical). The engine is
//! synchronous and **not thread safe**: it assumes exclusive access to its state between
//! `tick` calls, and only the radio's `send`/`poll_rx` ever block.

mod table;
mod trace;

pub use self::table::{Direction, Entry, Rate, Value, ValueKind};
pub use self::trace::PayloadTrace;

use crate::bytes::{ByteReader, ByteWriter, ToBytes};
use crate::frame::{FrameCodec, MAX_FRAME, MAX_PAYLOAD};
use crate::module::{ModuleId, Modules};
use crate::radio::{RadioLink, FIFO_SIZE};
use crate::utils::HexSlice;
use crate::Error;
use heapless::Vec;

/// First payload byte of an acknowledgement token.
pub const ACK_ID: u8 = 0xFF;

/// First payload byte of a round-update token.
pub const ROUND_UPDATE_ID: u8 = 0xFE;

/// Largest mailbox table the engine accepts.
///
/// Data tokens name entries with a single byte, and the two values above are reserved, so the
/// hard ceiling is 0xFE rows; in practice tables are tiny and this keeps the engine's queues
/// comfortably bounded.
pub const MAX_ENTRIES: usize = 32;

/// The local transmit counter wraps at this value; periodic rates divide into it.
const ROUND_COUNTER_PERIOD: u8 = 100;

/// Worst case: a data token per entry, an ack per entry, plus the round update.
const TX_QUEUE_LEN: usize = 2 * MAX_ENTRIES + 1;

/// Wire bytes of the largest single token (index byte plus a 4-byte value).
const MAX_TOKEN_LEN: usize = 5;

/// A unit of work queued for the packer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Token {
    /// Transmit the current value of the entry at this index.
    Data(u8),
    /// Acknowledge receipt of the entry at this index.
    Ack(u8),
    /// Hand the transmit turn to the next module.
    RoundUpdate,
}

/// Counters kept by the engine, mostly of interest to tests and monitoring.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Frames addressed to this module that were pulled out of the receive stream.
    pub rx_frames: u32,
    /// Subset of `rx_frames` that failed key, version or checksum validation.
    pub rx_invalid: u32,
    /// Acknowledgements that were still outstanding when our next transmit turn began.
    pub missed_acks: u32,
}

/// Point-in-time view of the engine, for assertions in tests.
#[derive(Debug)]
pub struct Snapshot<'a> {
    pub entries: &'a [Entry],
    pub current_round: u8,
    pub round_counter: u8,
    pub stats: Stats,
}

/// The session-layer state machine of one bus node.
pub struct Mailbox<'e, R: RadioLink> {
    radio: R,
    codec: FrameCodec,
    entries: &'e mut [Entry],
    awaiting_ack: Vec<bool, MAX_ENTRIES>,
    tx_queue: Vec<Token, TX_QUEUE_LEN>,
    /// Whose turn it is to transmit, in `0..modules.count()`.
    current_round: u8,
    /// Local transmit tick in `0..ROUND_COUNTER_PERIOD`, used only for rate gating.
    round_counter: u8,
    stats: Stats,
}

impl<'e, R: RadioLink> Mailbox<'e, R> {
    /// Creates an engine for the module `local` of `modules`, owning `radio` and the mailbox
    /// table `entries`.
    ///
    /// The table is shared by convention with every peer on the bus; its indices are the wire
    /// identity of the entries.
    ///
    /// # Panics
    ///
    /// Panics when the table has more than [`MAX_ENTRIES`] rows. A table the wire cannot
    /// address is a configuration bug, not a runtime condition.
    pub fn new(radio: R, local: ModuleId, modules: Modules, entries: &'e mut [Entry]) -> Self {
        assert!(
            entries.len() <= MAX_ENTRIES,
            "mailbox table has {} entries, at most {} are addressable",
            entries.len(),
            MAX_ENTRIES
        );
        let mut awaiting_ack = Vec::new();
        // capacity checked just above
        awaiting_ack.resize(entries.len(), false).unwrap();

        Mailbox {
            radio,
            codec: FrameCodec::new(local, modules),
            entries,
            awaiting_ack,
            tx_queue: Vec::new(),
            current_round: 0,
            round_counter: 0,
            stats: Stats::default(),
        }
    }

    /// Readies the radio and enters receive mode.
    pub fn init(&mut self) -> Result<(), R::Error> {
        self.radio.init()?;
        self.radio.set_rx_mode()?;
        debug!("mailbox up as {:?}", self.local());
        Ok(())
    }

    /// The module this engine runs on.
    pub fn local(&self) -> ModuleId {
        self.codec.local()
    }

    /// Replaces the session key. All peers must switch in lockstep; frames under the old key
    /// will be flagged invalid from now on.
    pub fn update_key(&mut self, key: u8) {
        debug!("session key updated");
        self.codec.set_key(key);
    }

    /// Runs one cycle: drain the receive path, then transmit if it is this module's turn.
    ///
    /// Acks for data received in this cycle are emitted in this same cycle's transmit phase.
    pub fn tick(&mut self) {
        self.rx_phase();
        self.tx_phase();
    }

    /// Stores a new value into an entry this module produces and requests its transmission.
    ///
    /// Refused when the entry belongs to another module or when `value` is not of the entry's
    /// declared kind. On success the entry's flag is set, which queues async entries for the
    /// next transmit turn.
    pub fn set(&mut self, index: usize, value: Value) -> Result<(), Error> {
        let local = self.local();
        let entry = self.entries.get_mut(index).ok_or(Error::BadIndex)?;
        if entry.source() != local {
            return Err(Error::NotProducer);
        }
        if entry.kind() != value.kind() {
            return Err(Error::KindMismatch);
        }
        entry.set_value(value);
        entry.set_flag(true);
        Ok(())
    }

    /// Returns an entry's current value: the last received one for consumed entries, the last
    /// stored one for produced entries.
    pub fn get(&self, index: usize) -> Result<Value, Error> {
        self.entries.get(index).map(Entry::value).ok_or(Error::BadIndex)
    }

    /// Whether the entry has an unserviced event: a newly received value, or a pending async
    /// transmission.
    pub fn flag(&self, index: usize) -> Result<bool, Error> {
        self.entries.get(index).map(Entry::flag).ok_or(Error::BadIndex)
    }

    /// Clears an entry's flag after servicing it.
    pub fn clear_flag(&mut self, index: usize) -> Result<(), Error> {
        self.entries
            .get_mut(index)
            .map(|entry| entry.set_flag(false))
            .ok_or(Error::BadIndex)
    }

    /// Captures the engine state for assertions.
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            entries: self.entries,
            current_round: self.current_round,
            round_counter: self.round_counter,
            stats: self.stats,
        }
    }

    /// The mailbox table.
    pub fn entries(&self) -> &[Entry] {
        self.entries
    }

    /// Whose turn it is to transmit.
    pub fn current_round(&self) -> u8 {
        self.current_round
    }

    /// The local transmit tick used for rate gating.
    pub fn round_counter(&self) -> u8 {
        self.round_counter
    }

    /// Whether a data token for this entry is still waiting for its acknowledgement.
    pub fn awaiting_ack(&self, index: usize) -> bool {
        self.awaiting_ack.get(index).copied().unwrap_or(false)
    }

    /// The engine's counters.
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Access to the radio, for harnesses that shuttle frames between simulated nodes.
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Drains the radio and applies every valid frame's token stream.
    fn rx_phase(&mut self) {
        let mut buf = [0; 2 * FIFO_SIZE];
        let n = match self.radio.poll_rx(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                error!("radio poll failed: {:?}", e);
                return;
            }
        };

        for frame in self.codec.decode_stream(&buf[..n]) {
            self.stats.rx_frames += 1;
            if !frame.valid {
                self.stats.rx_invalid += 1;
                warn!(
                    "invalid frame from {:?}: {:?}",
                    frame.source,
                    HexSlice(frame.payload)
                );
                continue;
            }
            trace!("rx {}", PayloadTrace::new(frame.payload, self.entries));
            self.dispatch(frame.payload);
        }
    }

    /// Walks a validated payload's token stream and applies each token.
    fn dispatch(&mut self, payload: &[u8]) {
        let mut bytes = ByteReader::new(payload);
        while !bytes.is_empty() {
            let applied = match bytes.read_u8() {
                Ok(ACK_ID) => self.on_ack(&mut bytes),
                Ok(ROUND_UPDATE_ID) => self.on_round_update(&mut bytes),
                Ok(index) => self.on_data(index, &mut bytes),
                Err(e) => Err(e),
            };
            if let Err(e) = applied {
                warn!(
                    "undecodable token stream ({}), rest dropped: {:?}",
                    e,
                    HexSlice(payload)
                );
                break;
            }
        }
    }

    fn on_ack(&mut self, bytes: &mut ByteReader<'_>) -> Result<(), Error> {
        let index = usize::from(bytes.read_u8()?);
        match self.awaiting_ack.get_mut(index) {
            Some(outstanding) => {
                *outstanding = false;
                Ok(())
            }
            None => Err(Error::BadIndex),
        }
    }

    fn on_round_update(&mut self, bytes: &mut ByteReader<'_>) -> Result<(), Error> {
        let proposed = bytes.read_u8()?;
        self.advance_round();
        if proposed != self.current_round {
            warn!(
                "round update out of order: computed {}, peer proposes {}",
                self.current_round, proposed
            );
            self.current_round = proposed;
        }
        Ok(())
    }

    fn on_data(&mut self, index: u8, bytes: &mut ByteReader<'_>) -> Result<(), Error> {
        let entry = self
            .entries
            .get_mut(usize::from(index))
            .ok_or(Error::BadIndex)?;
        let value = entry.kind().read_value(bytes)?;
        entry.set_value(value);
        entry.set_flag(true);
        self.enqueue(Token::Ack(index));
        Ok(())
    }

    /// Audits outstanding acks, queues every due entry and the round update, then packs and
    /// transmits. Runs only on this module's turn.
    fn tx_phase(&mut self) {
        if self.current_round != self.local().raw() {
            return;
        }

        // Anything still outstanding from our previous turn never came back. Report it and
        // move on; there is no retransmission.
        for (index, outstanding) in self.awaiting_ack.iter_mut().enumerate() {
            if *outstanding {
                warn!("missing ack for entry {}", index);
                self.stats.missed_acks += 1;
                *outstanding = false;
            }
        }

        for index in 0..self.entries.len() {
            let entry = &self.entries[index];
            if entry.source() != self.local() {
                continue;
            }
            let due = match entry.rate() {
                Rate::Async => entry.flag(),
                Rate::Every(period) => self.round_counter % period.get() == 0,
            };
            if due {
                self.enqueue(Token::Data(index as u8));
                self.awaiting_ack[index] = true;
            }
        }

        // The round update always goes out last, so peers apply our data before the turn
        // changes hands.
        self.enqueue(Token::RoundUpdate);
        self.pack_and_send();

        self.round_counter = (self.round_counter + 1) % ROUND_COUNTER_PERIOD;
    }

    fn enqueue(&mut self, token: Token) {
        if self.tx_queue.push(token).is_err() {
            warn!("tx queue full, dropping {:?}", token);
        }
    }

    /// Moves the transmit turn to the next module.
    fn advance_round(&mut self) {
        self.current_round = (self.current_round + 1) % self.codec.modules().count();
    }

    /// Serialises the queued tokens into frames of at most [`MAX_PAYLOAD`] bytes.
    ///
    /// Tokens for different destinations sharing one frame coerce that frame to broadcast;
    /// the coercion applies to the frame being filled (including the one flushed by the token
    /// that overflowed it) and resets at every frame boundary.
    fn pack_and_send(&mut self) {
        let mut msg_buf: Vec<u8, MAX_PAYLOAD> = Vec::new();
        let mut msg_dest: Option<ModuleId> = None;

        for i in 0..self.tx_queue.len() {
            let token = self.tx_queue[i];
            let (formatted, token_dest) = self.format_token(token);

            let dest = match msg_dest {
                Some(current) if current != token_dest => self.codec.modules().broadcast(),
                Some(current) => current,
                None => token_dest,
            };

            if msg_buf.len() + formatted.len() > MAX_PAYLOAD {
                self.transmit(&msg_buf, dest);
                msg_buf.clear();
                msg_dest = Some(token_dest);
            } else {
                msg_dest = Some(dest);
            }

            // a token is at most MAX_TOKEN_LEN bytes and the buffer was just checked or
            // flushed, so this cannot overflow
            msg_buf.extend_from_slice(&formatted).unwrap();
        }

        if !msg_buf.is_empty() {
            if let Some(dest) = msg_dest {
                self.transmit(&msg_buf, dest);
            }
        }
        self.tx_queue.clear();
    }

    /// Renders one token into its wire bytes and returns them with the destination the token
    /// wants.
    ///
    /// Rendering a round update advances the local round first, so the emitted token names
    /// the next transmitter.
    fn format_token(&mut self, token: Token) -> (Vec<u8, MAX_TOKEN_LEN>, ModuleId) {
        let mut out = Vec::new();
        let dest = match token {
            Token::Data(index) => {
                let entry = &self.entries[usize::from(index)];
                let mut value = [0; 4];
                let mut writer = ByteWriter::new(&mut value);
                // a declared value always fits four bytes
                entry.value().to_bytes(&mut writer).unwrap();
                let used = 4 - writer.space_left();

                out.push(index).unwrap();
                out.extend_from_slice(&value[..used]).unwrap();
                entry.destination()
            }
            Token::Ack(index) => {
                out.extend_from_slice(&[ACK_ID, index]).unwrap();
                self.entries[usize::from(index)].source()
            }
            Token::RoundUpdate => {
                self.advance_round();
                out.extend_from_slice(&[ROUND_UPDATE_ID, self.current_round])
                    .unwrap();
                self.codec.modules().broadcast()
            }
        };
        (out, dest)
    }

    /// Wraps one packed payload in a frame and hands it to the radio.
    fn transmit(&mut self, payload: &[u8], destination: ModuleId) {
        trace!(
            "tx to {:?}: {}",
            destination,
            PayloadTrace::new(payload, self.entries)
        );
        let mut buf = [0; MAX_FRAME];
        let frame = match self.codec.encode(payload, destination, &mut buf) {
            Ok(frame) => frame,
            Err(e) => {
                error!("frame refused ({}): {:?}", e, HexSlice(payload));
                return;
            }
        };
        if let Err(e) = self.radio.send(frame) {
            error!("radio send failed: {:?}", e);
        }
    }
}
