use nom::error::{ErrorKind, ParseError};
use thiserror::Error;

/// Parser-internal failure, carrying the input slice it happened at so the
/// byte offset can be recovered once parsing unwinds.
#[derive(Debug, PartialEq)]
pub(crate) enum RawError<'a> {
    Nom(&'a [u8], ErrorKind),
    Truncated(&'a [u8]),
    LengthPastEnd(&'a [u8]),
    UnterminatedInteger(&'a [u8]),
    InvalidInteger(&'a [u8]),
    UnknownPrefix(&'a [u8], u8),
    NonStringKey(&'a [u8]),
    DuplicateKey(&'a [u8]),
    TooDeep(&'a [u8]),
}

impl<'a> ParseError<&'a [u8]> for RawError<'a> {
    fn from_error_kind(input: &'a [u8], kind: ErrorKind) -> Self {
        RawError::Nom(input, kind)
    }

    fn append(_input: &'a [u8], _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> RawError<'a> {
    /// Converts into the owned error type, translating the remaining-input
    /// slice into a byte offset within `full`.
    pub(crate) fn into_public(self, full: &[u8]) -> BencodeError {
        let at = |rest: &[u8]| full.len() - rest.len();
        match self {
            RawError::Nom(i, _) if i.is_empty() => BencodeError::Truncated(at(i)),
            RawError::Nom(i, _) => BencodeError::Syntax(at(i)),
            RawError::Truncated(i) => BencodeError::Truncated(at(i)),
            RawError::LengthPastEnd(i) => BencodeError::LengthPastEnd(at(i)),
            RawError::UnterminatedInteger(i) => BencodeError::UnterminatedInteger(at(i)),
            RawError::InvalidInteger(i) => BencodeError::InvalidInteger(at(i)),
            RawError::UnknownPrefix(i, byte) => BencodeError::UnknownPrefix {
                offset: at(i),
                byte,
            },
            RawError::NonStringKey(i) => BencodeError::NonStringKey(at(i)),
            RawError::DuplicateKey(i) => BencodeError::DuplicateKey(at(i)),
            RawError::TooDeep(i) => BencodeError::TooDeep(at(i)),
        }
    }
}

/// Decode failure surfaced to callers. Offsets are byte positions into the
/// buffer handed to [`decode`](crate::bencode::decode).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BencodeError {
    #[error("input truncated at offset {0}")]
    Truncated(usize),
    #[error("string length at offset {0} points past the end of input")]
    LengthPastEnd(usize),
    #[error("integer at offset {0} is missing its 'e' terminator")]
    UnterminatedInteger(usize),
    #[error("invalid integer literal at offset {0}")]
    InvalidInteger(usize),
    #[error("unrecognized value prefix {byte:#04x} at offset {offset}")]
    UnknownPrefix { offset: usize, byte: u8 },
    #[error("dictionary key at offset {0} is not a byte string")]
    NonStringKey(usize),
    #[error("duplicate dictionary key at offset {0}")]
    DuplicateKey(usize),
    #[error("value nesting at offset {0} exceeds the supported depth")]
    TooDeep(usize),
    #[error("malformed bencode at offset {0}")]
    Syntax(usize),
}
