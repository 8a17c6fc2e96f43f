use std::fmt::{Display, Formatter, self};
use std::io;

/// Raised when a byte stream cannot be decoded into tokens. All failures are
/// terminal: the decoder does not resynchronize after an error.
#[derive(Debug)]
pub enum DecodeError {
    /// The stream ended although more bytes were required. An end of stream at
    /// a top-level item boundary is not an error and is reported as a clean
    /// end of the token sequence instead.
    Eof,
    Io(io::Error),
    Utf8(std::str::Utf8Error),
    /// The reserved additional-information values 28, 29 and 30 were used.
    InvalidMinorType(u8),
    /// A simple value under major type 7 that this codec does not recognize.
    UnsupportedSimple(u8),
    /// Break without an indefinite context, mismatched chunk types, nested
    /// indefinite strings and similar container grammar violations.
    Nesting(&'static str),
    /// A map key with a major type other than text string.
    Key(&'static str),
    /// An integer magnitude that does not fit a 64-bit signed representation.
    IntegerOverflow,
    /// A declared length exceeding what `usize` can index on this platform.
    Length(u64),
    Allocation,
    /// A tag 0 timestamp literal that does not parse.
    Date(String),
    /// A tag 37 byte string whose length is not exactly 16.
    UuidLength(usize),
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> DecodeError {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => DecodeError::Eof,
            _ => DecodeError::Io(e),
        }
    }
}

impl From<std::str::Utf8Error> for DecodeError {
    fn from(e: std::str::Utf8Error) -> DecodeError {
        DecodeError::Utf8(e)
    }
}

impl From<std::collections::TryReserveError> for DecodeError {
    fn from(_e: std::collections::TryReserveError) -> DecodeError {
        DecodeError::Allocation
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Io(e) => Some(e),
            DecodeError::Utf8(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            DecodeError::Eof => f.write_str("Unexpected end of stream while decoding"),
            DecodeError::Io(e) => write!(f, "IO error {}", e),
            DecodeError::Utf8(e) => write!(f, "Text wasn't valid Utf-8: {}", e),
            DecodeError::InvalidMinorType(m) => write!(f, "Reserved additional information {} in initial byte", m),
            DecodeError::UnsupportedSimple(s) => write!(f, "Unrecognized simple value {}", s),
            DecodeError::Nesting(msg) => f.write_str(msg),
            DecodeError::Key(found) => write!(f, "Expecting text string for map key, found {}", found),
            DecodeError::IntegerOverflow => f.write_str("Integer magnitude exceeds 64 bits"),
            DecodeError::Length(value) => write!(f, "Length {} exceeds maximum {}", value, usize::MAX),
            DecodeError::Allocation => f.write_str("An allocation failed"),
            DecodeError::Date(msg) => write!(f, "Invalid date-time literal: {}", msg),
            DecodeError::UuidLength(len) => write!(f, "UUID byte string must be 16 bytes, found {}", len),
        }
    }
}

/// Raised when a token sequence cannot be encoded, either because the call
/// sequence is malformed or because the underlying sink fails.
#[derive(Debug)]
pub enum EncodeError {
    Io(io::Error),
    /// Unbalanced start/end calls, a property name outside a map and similar
    /// call-sequence violations.
    InvalidState(&'static str),
    /// A construct with no CBOR representation, such as raw JSON or comments.
    Unsupported(&'static str),
    Length(usize),
}

impl From<io::Error> for EncodeError {
    fn from(e: io::Error) -> EncodeError {
        EncodeError::Io(e)
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EncodeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for EncodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            EncodeError::Io(e) => write!(f, "IO error {}", e),
            EncodeError::InvalidState(msg) => f.write_str(msg),
            EncodeError::Unsupported(msg) => f.write_str(msg),
            EncodeError::Length(value) => write!(f, "Length {} exceeds maximum {}", value, u64::MAX),
        }
    }
}
