//! Semantic tags assign extended meaning to the data item they precede. The
//! decoder resolves a pending tag through a lookup table from tag number to a
//! decode transform; tags without an entry leave the underlying value
//! untouched and are discarded after one use. The encoder-side counterparts
//! of the built-in transforms live here as well, so both directions agree on
//! byte layout and timestamp shape.

use crate::error::DecodeError;
use crate::token::Token;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Tag 0: date-time as a text string.
pub const TAG_DATE_TIME_STRING: u64 = 0;
/// Tag 1: date-time as epoch seconds.
pub const TAG_DATE_TIME_EPOCH: u64 = 1;
/// Tag 37: UUID as a 16-byte string.
pub const TAG_UUID: u64 = 37;

/// The "u" timestamp pattern of the source format: universal sortable,
/// seconds precision, literal `Z`.
const TIMESTAMP_PATTERN: &str = "%Y-%m-%d %H:%M:%SZ";

/// How offset-less timestamp literals are interpreted on decode and how dates
/// are normalized before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeZonePolicy {
    /// Interpret and render wall-clock times in the host's local time zone.
    TreatAsLocal,
    #[default]
    TreatAsUtc,
    /// Take the literal at face value without adjustment.
    LeaveUnspecified,
}

/// Which of the two recognized date-time representations the encoder emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateTimeEncoding {
    /// Tag 0 followed by a "u"-pattern text string.
    #[default]
    String,
    /// Tag 1 followed by epoch seconds as an integer.
    Epoch,
}

/// A decode transform: receives the raw token decoded under a tag and either
/// replaces it, passes it through, or fails.
pub type TagDecoder = fn(TimeZonePolicy, Token) -> Result<Token, DecodeError>;

/// The table mapping tag numbers to decode transforms. The default table
/// knows tags 0, 1 and 37; anything else passes through.
pub struct TagTable {
    entries: HashMap<u64, TagDecoder>,
}

impl TagTable {

    /// A table that passes every tagged value through unchanged.
    pub fn empty() -> TagTable {
        TagTable { entries: HashMap::new() }
    }

    /// Registers a transform for a tag number, replacing any previous entry.
    pub fn register(&mut self, tag: u64, decoder: TagDecoder) {
        self.entries.insert(tag, decoder);
    }

    pub(crate) fn apply(&self, tag: u64, token: Token, time_zone: TimeZonePolicy) -> Result<Token, DecodeError> {
        match self.entries.get(&tag) {
            Some(decoder) => decoder(time_zone, token),
            None => Ok(token),
        }
    }

}

impl Default for TagTable {
    fn default() -> TagTable {
        let mut table = TagTable::empty();
        table.register(TAG_DATE_TIME_STRING, decode_date_string);
        table.register(TAG_DATE_TIME_EPOCH, decode_date_epoch);
        table.register(TAG_UUID, decode_uuid);
        table
    }
}

fn decode_date_string(time_zone: TimeZonePolicy, token: Token) -> Result<Token, DecodeError> {
    match token {
        Token::Str(text) => parse_timestamp(&text, time_zone).map(Token::Date),
        other => Ok(other),
    }
}

fn decode_date_epoch(_time_zone: TimeZonePolicy, token: Token) -> Result<Token, DecodeError> {
    let seconds = match token {
        Token::I32(v) => v as i64,
        Token::I64(v) => v,
        Token::U64(v) => i64::try_from(v).map_err(|_| DecodeError::IntegerOverflow)?,
        other => return Ok(other),
    };
    match Utc.timestamp_opt(seconds, 0).single() {
        Some(date) => Ok(Token::Date(date)),
        None => Err(DecodeError::Date(format!("epoch seconds {} out of range", seconds))),
    }
}

fn decode_uuid(_time_zone: TimeZonePolicy, token: Token) -> Result<Token, DecodeError> {
    match token {
        Token::Bytes(bytes) => match <[u8; 16]>::try_from(bytes.as_slice()) {
            // GUID byte layout: the first three fields are little-endian on wire
            Ok(array) => Ok(Token::Uuid(Uuid::from_bytes_le(array))),
            Err(_) => Err(DecodeError::UuidLength(bytes.len())),
        },
        other => Ok(other),
    }
}

/// Parses a tag 0 literal: either the "u" pattern, with the time-zone policy
/// deciding the meaning of the offset-less wall-clock time, or an RFC 3339
/// literal carrying its own offset.
pub(crate) fn parse_timestamp(text: &str, time_zone: TimeZonePolicy) -> Result<DateTime<Utc>, DecodeError> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Ok(date.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(text, TIMESTAMP_PATTERN)
        .map_err(|e| DecodeError::Date(format!("{}: {}", text, e)))?;
    Ok(resolve_naive(naive, time_zone))
}

fn resolve_naive(naive: NaiveDateTime, time_zone: TimeZonePolicy) -> DateTime<Utc> {
    match time_zone {
        TimeZonePolicy::TreatAsLocal => match Local.from_local_datetime(&naive).earliest() {
            Some(date) => date.with_timezone(&Utc),
            // nonexistent local wall-clock time (DST gap)
            None => Utc.from_utc_datetime(&naive),
        },
        TimeZonePolicy::TreatAsUtc | TimeZonePolicy::LeaveUnspecified => Utc.from_utc_datetime(&naive),
    }
}

/// Renders a date in the "u" pattern for tag 0, in the wall clock selected by
/// the time-zone policy.
pub(crate) fn format_timestamp(date: &DateTime<Utc>, time_zone: TimeZonePolicy) -> String {
    match time_zone {
        TimeZonePolicy::TreatAsLocal => date.with_timezone(&Local).format(TIMESTAMP_PATTERN).to_string(),
        TimeZonePolicy::TreatAsUtc | TimeZonePolicy::LeaveUnspecified => date.format(TIMESTAMP_PATTERN).to_string(),
    }
}

/// Epoch seconds for tag 1. Sub-second precision is not representable in
/// this encoding and is truncated.
pub(crate) fn epoch_seconds(date: &DateTime<Utc>) -> i64 {
    date.timestamp()
}

/// GUID byte layout for tag 37, mirroring [`decode_uuid`].
pub(crate) fn uuid_bytes(uuid: &Uuid) -> [u8; 16] {
    uuid.to_bytes_le()
}
