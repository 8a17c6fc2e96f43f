//! A CBOR item starts with an initial byte whose top three bits select the
//! major type and whose bottom five bits carry the additional information,
//! consistently named `info`. If `info` is less than 24 it is the value (or
//! length) itself. The values 24 through 27 announce that the value follows
//! in one, two, four or eight bytes in network byte order; 28 through 30 are
//! reserved and must fail; 31 marks an indefinite length, or the break marker
//! when the major type is primitive.

use crate::error::EncodeError;
use std::io::Write;

/// The eight major types of the CBOR grammar, carried in the top three bits
/// of an item's initial byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MajorType {
    UnsignedInteger = 0,
    NegativeInteger = 1,
    ByteString = 2,
    TextString = 3,
    Array = 4,
    Map = 5,
    Tag = 6,
    Primitive = 7,
}

impl MajorType {

    /// Returns the mnemonic of the major type. This is useful for error messages.
    pub fn name(&self) -> &'static str {
        match *self {
            MajorType::UnsignedInteger => "unsigned integer",
            MajorType::NegativeInteger => "negative integer",
            MajorType::ByteString => "byte string",
            MajorType::TextString => "text string",
            MajorType::Array => "array",
            MajorType::Map => "map",
            MajorType::Tag => "tag",
            MajorType::Primitive => "primitive",
        }
    }

    fn of(bits: u8) -> MajorType {
        match bits {
            0 => MajorType::UnsignedInteger,
            1 => MajorType::NegativeInteger,
            2 => MajorType::ByteString,
            3 => MajorType::TextString,
            4 => MajorType::Array,
            5 => MajorType::Map,
            6 => MajorType::Tag,
            _ => MajorType::Primitive,
        }
    }

}

// Simple values under major type 7
pub(crate) const FALSE: u8 = 20;
pub(crate) const TRUE: u8 = 21;
pub(crate) const NULL: u8 = 22;
pub(crate) const UNDEFINED: u8 = 23;
pub(crate) const HALF_FLOAT: u8 = 25;
pub(crate) const SINGLE_FLOAT: u8 = 26;
pub(crate) const DOUBLE_FLOAT: u8 = 27;
pub(crate) const BREAK: u8 = 31;

// Additional information announcing follow bytes
pub(crate) const FOLLOWS_U8: u8 = 24;
pub(crate) const FOLLOWS_U16: u8 = 25;
pub(crate) const FOLLOWS_U32: u8 = 26;
pub(crate) const FOLLOWS_U64: u8 = 27;
pub(crate) const INDEFINITE: u8 = 31;

const SHIFT: u8 = 5;

/// Splits an initial byte into major type and additional information.
#[inline]
pub(crate) fn split(byte: u8) -> (MajorType, u8) {
    (MajorType::of(byte >> SHIFT), byte & ((1 << SHIFT) - 1))
}

/// Joins a major type and additional information into an initial byte.
#[inline]
pub(crate) fn initial(major: MajorType, info: u8) -> u8 {
    (major as u8) << SHIFT | (info & ((1 << SHIFT) - 1))
}

/// Encodes a head with the smallest width that holds `value`. This single rule
/// covers integer values, string lengths, collection counts and tag numbers.
pub(crate) fn write_head<W: Write>(w: &mut W, major: MajorType, value: u64) -> Result<(), EncodeError> {
    if value < FOLLOWS_U8 as u64 {
        w.write_all(&[initial(major, value as u8)])?;
    } else if value <= u8::MAX as u64 {
        w.write_all(&[initial(major, FOLLOWS_U8), value as u8])?;
    } else if value <= u16::MAX as u64 {
        w.write_all(&[initial(major, FOLLOWS_U16)])?;
        w.write_all(&(value as u16).to_be_bytes())?;
    } else if value <= u32::MAX as u64 {
        w.write_all(&[initial(major, FOLLOWS_U32)])?;
        w.write_all(&(value as u32).to_be_bytes())?;
    } else {
        w.write_all(&[initial(major, FOLLOWS_U64)])?;
        w.write_all(&value.to_be_bytes())?;
    }
    Ok(())
}
