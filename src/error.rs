//! Error types for the codec, client, framer and proxy.

use std::fmt;
use std::io;

use thiserror::Error;

/// The step of an exchange that an I/O failure happened in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Begin,
    Params,
    Stdin,
    Read,
    Dial,
    ReadRequest,
    WriteRequest,
    ReadResponse,
    WriteResponse,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Phase::Begin => "cannot write begin request",
            Phase::Params => "cannot write params",
            Phase::Stdin => "cannot write stdin",
            Phase::Read => "cannot read from server",
            Phase::Dial => "cannot connect to upstream",
            Phase::ReadRequest => "cannot read request",
            Phase::WriteRequest => "cannot forward request",
            Phase::ReadResponse => "cannot read response",
            Phase::WriteResponse => "cannot forward response",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid FastCGI version {0}")]
    InvalidVersion(u8),

    #[error("record body of {len} bytes exceeds the protocol maximum")]
    RecordTooLarge { len: usize },

    #[error("record content of {len} bytes does not fit in one record")]
    ContentTooLong { len: usize },

    #[error("truncated record: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("pair block of {size} bytes exceeds the maximum of {max} bytes")]
    PairBlockTooLarge { size: usize, max: usize },

    #[error("un-encodable name-value pair length {len:#x}")]
    PairTooLong { len: usize },

    #[error("truncated name-value pair at offset {offset}")]
    TruncatedPairs { offset: usize },

    #[error("unexpected record: expected {expected}, got {got}")]
    UnexpectedRecord { expected: &'static str, got: String },

    #[error("connection closed before the message was complete")]
    IncompleteMessage,

    #[error("malformed {record} body: {len} bytes")]
    InvalidBody { record: &'static str, len: usize },

    #[error("cannot parse response, no blank line between headers and body")]
    MissingHeaderSeparator,

    #[error("{phase}: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Annotate a plain I/O error with the phase it happened in. Codec errors pass through
    /// untouched since they already say what went wrong.
    pub fn in_phase(self, phase: Phase) -> Error {
        match self {
            Error::Io(source) => Error::Transport { phase, source },
            other => other,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Transport { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
