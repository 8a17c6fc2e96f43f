//! The unit of exchange between the codec and its caller is the [`Token`].
//! A document is a flat sequence of tokens; the codec never materializes a
//! tree. Containers appear as balanced start/end pairs, map entries as a
//! `Key` token followed by the entry's value.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One decoded or encoded unit of the structured-value event stream.
///
/// Integers are width-minimal: the decoder emits the narrowest of `I32`,
/// `I64` and `U64` that losslessly holds the value, `U64` appearing only for
/// magnitudes above `i64::MAX`. Half-precision floats decode into `F64`.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    StartArray,
    EndArray,
    StartMap,
    EndMap,
    /// A map entry's property name.
    Key(String),
    Null,
    Undefined,
    Bool(bool),
    I32(i32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// A tag 0 or tag 1 date-time, normalized to UTC.
    Date(DateTime<Utc>),
    /// A tag 37 UUID.
    Uuid(Uuid),
}
