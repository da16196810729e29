use core::fmt;

/// Errors returned by the bus.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Unexpectedly reached EOF while reading or writing data.
    ///
    /// This is returned when something tries to fit too much data into a
    /// frame or other fixed-size buffer, and also when reaching EOF
    /// prematurely while reading data from a buffer.
    Eof,

    /// Payload does not fit into a single frame.
    PayloadTooLong,

    /// Destination names neither a known module nor the broadcast id.
    InvalidDestination,

    /// Entry index outside the mailbox table.
    BadIndex,

    /// Attempt to store into an entry produced by another module.
    NotProducer,

    /// Stored value kind does not match the entry's declared kind.
    KindMismatch,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::Eof => "end of buffer",
            Error::PayloadTooLong => "payload exceeds frame capacity",
            Error::InvalidDestination => "destination is not on the bus",
            Error::BadIndex => "no mailbox entry at index",
            Error::NotProducer => "entry is produced by another module",
            Error::KindMismatch => "value kind does not match entry",
        })
    }
}
