//! Error types for the R2P2 engine.

use std::fmt;
use std::io;

/// Error type for R2P2 operations.
#[derive(Debug)]
pub enum Error {
    /// IO error from the underlying transport.
    Io(io::Error),
    /// No free client or server pair slot available.
    PairPoolExhausted,
    /// No free packet buffer available.
    BufPoolExhausted,
    /// Message needs more packets than the 8-bit packet counter can express.
    MsgTooLarge { size: usize, max: usize },
    /// Handle does not refer to a live pair.
    InvalidHandle,
    /// Datagram shorter than the wire header.
    TruncatedPacket { len: usize },
    /// Invalid magic byte in the wire header.
    BadMagic { got: u8 },
    /// Unexpected header size field.
    BadHeaderSize { got: u8 },
    /// Unknown message type nibble.
    BadMsgType(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::PairPoolExhausted => write!(f, "No free pair slot available"),
            Error::BufPoolExhausted => write!(f, "No free packet buffer available"),
            Error::MsgTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes, max {} bytes", size, max)
            }
            Error::InvalidHandle => write!(f, "Handle does not refer to a live pair"),
            Error::TruncatedPacket { len } => {
                write!(f, "Datagram of {} bytes is shorter than the header", len)
            }
            Error::BadMagic { got } => write!(f, "Invalid magic byte: {:#x}", got),
            Error::BadHeaderSize { got } => write!(f, "Unexpected header size: {}", got),
            Error::BadMsgType(t) => write!(f, "Unknown message type: {}", t),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type for R2P2 operations.
pub type Result<T> = std::result::Result<T, Error>;
