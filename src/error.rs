//! Error types.
//!
//! Query methods on [`Velocity`](crate::Velocity) never surface these to the
//! caller; they log and fall back to a safe default. Everything below the
//! query layer propagates them with `?`.

use thiserror::Error;

/// Result type alias for veltime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to decode a stored byte sequence into a record.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Byte length is not 4, 8, or a multiple of 8 above 8.
    #[error("invalid record length {0}")]
    InvalidLength(usize),
}

/// Primary error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("decode failed: {0}")]
    Codec(#[from] CodecError),

    /// Malformed import line, wire line or date string.
    #[error("cannot parse {what}: {input:?}")]
    Parse { what: &'static str, input: String },

    #[error("invalid key pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Backend construction or open failed, or the backend kind is unknown.
    #[error("backend {kind} unavailable: {reason}")]
    BackendUnavailable { kind: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn parse(what: &'static str, input: impl Into<String>) -> Self {
        Error::Parse {
            what,
            input: input.into(),
        }
    }

    pub(crate) fn unavailable(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::BackendUnavailable {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let e: Error = CodecError::InvalidLength(5).into();
        assert_eq!(e.to_string(), "decode failed: invalid record length 5");

        let e = Error::parse("date", "2017-13-01");
        assert_eq!(e.to_string(), "cannot parse date: \"2017-13-01\"");

        let e = Error::unavailable("lmdb", "not registered");
        assert_eq!(e.to_string(), "backend lmdb unavailable: not registered");
    }
}
