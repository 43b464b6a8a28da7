use std::error;
use std::fmt;
use std::io;

/// Errors surfaced at the crate boundary.
///
/// Nothing here is recovered internally; a failed operation leaves the
/// digest exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An argument failed validation: a non-finite observation, a zero
    /// weight, a quantile outside [0, 1] or asked of a digest with fewer
    /// than two centroids, a non-positive compression.
    InvalidInput(&'static str),
    /// A count was too wide for the compact varint encoding, or a decoded
    /// varint ran past the shift ceiling of a well-formed stream.
    Overflow,
    /// A serialized digest led with a tag this crate does not know.
    UnknownFormat(i32),
    /// The byte stream ended before the declared centroids were consumed.
    Truncated,
    /// The reader or writer failed for a reason other than exhaustion.
    Io(io::ErrorKind),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::InvalidInput(what) => write!(f, "invalid input: {}", what),
            Error::Overflow => write!(f, "count does not fit the varint encoding"),
            Error::UnknownFormat(tag) => write!(f, "unknown encoding tag: {}", tag),
            Error::Truncated => write!(f, "byte stream ended mid-digest"),
            Error::Io(kind) => write!(f, "io error: {}", kind),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(cause: io::Error) -> Error {
        match cause.kind() {
            io::ErrorKind::UnexpectedEof => Error::Truncated,
            kind => Error::Io(kind),
        }
    }
}
