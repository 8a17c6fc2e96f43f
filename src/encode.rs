//! Push-based encoding of tokens into a CBOR byte stream. Collection heads
//! cannot be written eagerly because a definite-length head needs the item
//! count, which is only known once the collection ends. Written items are
//! therefore queued, each open collection remembers the queue position of its
//! head, and the queue drains to the writer as soon as every head it contains
//! has a resolved length. A forced flush resolves still-open heads by
//! switching them to the indefinite encoding, where the behaviour policy
//! permits it.

use crate::error::EncodeError;
use crate::header::{self, MajorType};
use crate::tags::{self, DateTimeEncoding, TimeZonePolicy};
use crate::token::Token;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::io::Write;
use uuid::Uuid;

/// How the encoder chooses between definite- and indefinite-length collection
/// heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionBehaviour {
    /// Buffer until the count is known; only a forced flush while a
    /// collection is still open demotes it to indefinite.
    #[default]
    DefiniteWherePossible,
    /// Buffer until the count is known; a forced flush drains at most up to
    /// the first still-open head.
    AlwaysDefinite,
    /// Emit every collection indefinite-length, buffering nothing across
    /// items.
    AlwaysIndefinite,
}

/// Options recognized by the [`Encoder`].
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub collection_behaviour: CollectionBehaviour,
    /// Which representation [`Encoder::write_date`] emits.
    pub date_time_encoding: DateTimeEncoding,
    /// The wall clock used when rendering tag 0 text timestamps.
    pub time_zone: TimeZonePolicy,
    /// Whether closing the encoder also closes (drops) the underlying writer.
    pub close_output: bool,
}

impl Default for EncoderOptions {
    fn default() -> EncoderOptions {
        EncoderOptions {
            collection_behaviour: CollectionBehaviour::default(),
            date_time_encoding: DateTimeEncoding::default(),
            time_zone: TimeZonePolicy::default(),
            close_output: true,
        }
    }
}

/// One queued output item, head bytes not yet rendered.
enum Pending {
    /// An initial byte whose info is the value itself: small integers, simple
    /// values, the break marker.
    Simple { major: MajorType, info: u8 },
    /// A head followed by payload bytes. For strings the payload length is
    /// the head value; for everything else the payload is the big-endian
    /// value or float bits and the head announces the width.
    Scalar { major: MajorType, bytes: Vec<u8> },
    /// A collection head. A negative count means indefinite.
    Collection { major: MajorType, count: i64 },
}

/// Bookkeeping for a collection whose end has not been written yet. `seq` is
/// the queue sequence number of its head; `items` counts direct children, or
/// is negative once the head is committed to the indefinite encoding.
struct OpenCollection {
    seq: u64,
    major: MajorType,
    items: i64,
}

/// Encodes a pushed token sequence into CBOR. The caller is responsible for
/// pushing a well-formed sequence of values; map key/value alternation inside
/// an open map is not re-checked here.
pub struct Encoder<W: Write> {
    writer: W,
    queue: VecDeque<Pending>,
    open: Vec<OpenCollection>,
    /// Sequence number of the next queue item to reach the writer.
    popped: u64,
    options: EncoderOptions,
}

impl<W: Write> Encoder<W> {

    pub fn new(writer: W) -> Encoder<W> {
        Encoder::with_options(writer, EncoderOptions::default())
    }

    pub fn with_options(writer: W, options: EncoderOptions) -> Encoder<W> {
        Encoder {
            writer,
            queue: VecDeque::new(),
            open: Vec::new(),
            popped: 0,
            options,
        }
    }

    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    pub fn start_array(&mut self) -> Result<(), EncodeError> {
        self.start_collection(MajorType::Array)
    }

    pub fn start_map(&mut self) -> Result<(), EncodeError> {
        self.start_collection(MajorType::Map)
    }

    pub fn end_array(&mut self) -> Result<(), EncodeError> {
        self.end_collection(MajorType::Array, "no open array to end")
    }

    pub fn end_map(&mut self) -> Result<(), EncodeError> {
        self.end_collection(MajorType::Map, "no open map to end")
    }

    /// Writes a map entry's property name. Does not count as an item; only
    /// the entry's value does.
    pub fn write_key(&mut self, name: &str) -> Result<(), EncodeError> {
        match self.open.last() {
            Some(top) if top.major == MajorType::Map => {}
            _ => return Err(EncodeError::InvalidState("property name outside an open map")),
        }
        self.queue.push_back(Pending::Scalar {
            major: MajorType::TextString,
            bytes: name.as_bytes().to_vec(),
        });
        Ok(())
    }

    /// Writes a tag head in front of the next value. Like a key, a tag does
    /// not count as an item of the enclosing collection.
    pub fn write_tag(&mut self, tag: u64) -> Result<(), EncodeError> {
        self.push_uint(MajorType::Tag, tag);
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<(), EncodeError> {
        if value < 0 {
            // -1 - value, computed in two's complement to survive i64::MIN
            self.push_uint(MajorType::NegativeInteger, !(value as u64));
        } else {
            self.push_uint(MajorType::UnsignedInteger, value as u64);
        }
        self.count_item();
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), EncodeError> {
        self.push_uint(MajorType::UnsignedInteger, value);
        self.count_item();
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<(), EncodeError> {
        self.queue.push_back(Pending::Scalar {
            major: MajorType::Primitive,
            bytes: value.to_be_bytes().to_vec(),
        });
        self.count_item();
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<(), EncodeError> {
        self.queue.push_back(Pending::Scalar {
            major: MajorType::Primitive,
            bytes: value.to_be_bytes().to_vec(),
        });
        self.count_item();
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), EncodeError> {
        self.push_simple(if value { header::TRUE } else { header::FALSE });
        Ok(())
    }

    pub fn write_null(&mut self) -> Result<(), EncodeError> {
        self.push_simple(header::NULL);
        Ok(())
    }

    pub fn write_undefined(&mut self) -> Result<(), EncodeError> {
        self.push_simple(header::UNDEFINED);
        Ok(())
    }

    pub fn write_str(&mut self, value: &str) -> Result<(), EncodeError> {
        self.queue.push_back(Pending::Scalar {
            major: MajorType::TextString,
            bytes: value.as_bytes().to_vec(),
        });
        self.count_item();
        Ok(())
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> Result<(), EncodeError> {
        self.queue.push_back(Pending::Scalar {
            major: MajorType::ByteString,
            bytes: value.to_vec(),
        });
        self.count_item();
        Ok(())
    }

    /// Writes a date under tag 0 or tag 1, depending on the configured
    /// encoding.
    pub fn write_date(&mut self, date: DateTime<Utc>) -> Result<(), EncodeError> {
        match self.options.date_time_encoding {
            DateTimeEncoding::String => {
                self.write_tag(tags::TAG_DATE_TIME_STRING)?;
                self.write_str(&tags::format_timestamp(&date, self.options.time_zone))
            }
            DateTimeEncoding::Epoch => {
                self.write_tag(tags::TAG_DATE_TIME_EPOCH)?;
                self.write_i64(tags::epoch_seconds(&date))
            }
        }
    }

    /// Writes a UUID as tag 37 over a 16-byte string in GUID layout.
    pub fn write_uuid(&mut self, uuid: Uuid) -> Result<(), EncodeError> {
        self.write_tag(tags::TAG_UUID)?;
        self.write_bytes(&tags::uuid_bytes(&uuid))
    }

    pub fn write_raw(&mut self, _text: &str) -> Result<(), EncodeError> {
        Err(EncodeError::Unsupported("raw passthrough has no CBOR representation"))
    }

    pub fn write_comment(&mut self, _text: &str) -> Result<(), EncodeError> {
        Err(EncodeError::Unsupported("comments have no CBOR representation"))
    }

    pub fn write_whitespace(&mut self, _ws: &str) -> Result<(), EncodeError> {
        Err(EncodeError::Unsupported("whitespace has no CBOR representation"))
    }

    /// Writes one token, dispatching to the matching typed method.
    pub fn write_token(&mut self, token: &Token) -> Result<(), EncodeError> {
        match token {
            Token::StartArray => self.start_array(),
            Token::EndArray => self.end_array(),
            Token::StartMap => self.start_map(),
            Token::EndMap => self.end_map(),
            Token::Key(name) => self.write_key(name),
            Token::Null => self.write_null(),
            Token::Undefined => self.write_undefined(),
            Token::Bool(v) => self.write_bool(*v),
            Token::I32(v) => self.write_i64(*v as i64),
            Token::I64(v) => self.write_i64(*v),
            Token::U64(v) => self.write_u64(*v),
            Token::F32(v) => self.write_f32(*v),
            Token::F64(v) => self.write_f64(*v),
            Token::Str(v) => self.write_str(v),
            Token::Bytes(v) => self.write_bytes(v),
            Token::Date(v) => self.write_date(*v),
            Token::Uuid(v) => self.write_uuid(*v),
        }
    }

    /// Forces the buffered queue out to the writer. Under
    /// [`CollectionBehaviour::DefiniteWherePossible`] this commits still-open
    /// collections to the indefinite encoding; under
    /// [`CollectionBehaviour::AlwaysDefinite`] items behind a still-open head
    /// stay buffered.
    pub fn flush(&mut self) -> Result<(), EncodeError> {
        self.flush_internal(true)
    }

    /// Closes the encoder, flushing everything buffered. Fails if a
    /// collection is still open. Returns the underlying writer unless the
    /// options ask for it to be closed as well.
    pub fn close(mut self) -> Result<Option<W>, EncodeError> {
        if !self.open.is_empty() {
            return Err(EncodeError::InvalidState("collections remain open"));
        }
        self.flush_internal(true)?;
        if self.options.close_output {
            Ok(None)
        } else {
            Ok(Some(self.writer))
        }
    }

    fn start_collection(&mut self, major: MajorType) -> Result<(), EncodeError> {
        self.count_item();
        let indefinite = self.options.collection_behaviour == CollectionBehaviour::AlwaysIndefinite;
        let seq = self.popped + self.queue.len() as u64;
        self.queue.push_back(Pending::Collection { major, count: if indefinite { -1 } else { 0 } });
        self.open.push(OpenCollection { seq, major, items: if indefinite { -1 } else { 0 } });
        if indefinite {
            self.flush_internal(false)?;
        }
        Ok(())
    }

    fn end_collection(&mut self, major: MajorType, mismatch: &'static str) -> Result<(), EncodeError> {
        let top = match self.open.pop() {
            Some(top) if top.major == major => top,
            Some(top) => {
                self.open.push(top);
                return Err(EncodeError::InvalidState(mismatch));
            }
            None => return Err(EncodeError::InvalidState(mismatch)),
        };
        if top.items < 0 {
            self.queue.push_back(Pending::Simple { major: MajorType::Primitive, info: header::BREAK });
        } else if top.seq >= self.popped {
            // freeze the count into the still-queued head
            let index = (top.seq - self.popped) as usize;
            if let Some(Pending::Collection { count, .. }) = self.queue.get_mut(index) {
                *count = top.items;
            }
        }
        let force = self.open.is_empty();
        self.flush_internal(force)
    }

    /// Counts one item towards the enclosing open collection. Collections
    /// already committed to indefinite encoding no longer count.
    fn count_item(&mut self) {
        if let Some(top) = self.open.last_mut() {
            if top.items >= 0 {
                top.items += 1;
            }
        }
    }

    fn push_simple(&mut self, info: u8) {
        self.queue.push_back(Pending::Simple { major: MajorType::Primitive, info });
        self.count_item();
    }

    fn push_uint(&mut self, major: MajorType, value: u64) {
        if value < header::FOLLOWS_U8 as u64 {
            self.queue.push_back(Pending::Simple { major, info: value as u8 });
        } else {
            self.queue.push_back(Pending::Scalar { major, bytes: minimal_be_bytes(value) });
        }
    }

    /// Drains the queue to the writer. Stops at the head of a still-open
    /// collection unless `force` and the behaviour allow resolving it as
    /// indefinite.
    fn flush_internal(&mut self, force: bool) -> Result<(), EncodeError> {
        while let Some(item) = self.queue.pop_front() {
            match &item {
                Pending::Simple { major, info } => {
                    self.writer.write_all(&[header::initial(*major, *info)])?;
                }
                Pending::Scalar { major, bytes } => match major {
                    MajorType::TextString | MajorType::ByteString => {
                        header::write_head(&mut self.writer, *major, to_u64(bytes.len())?)?;
                        self.writer.write_all(bytes)?;
                    }
                    _ => {
                        let info = match bytes.len() {
                            1 => header::FOLLOWS_U8,
                            2 => header::FOLLOWS_U16,
                            4 => header::FOLLOWS_U32,
                            8 => header::FOLLOWS_U64,
                            _ => return Err(EncodeError::InvalidState("scalar payload must be 1, 2, 4 or 8 bytes")),
                        };
                        self.writer.write_all(&[header::initial(*major, info)])?;
                        self.writer.write_all(bytes)?;
                    }
                },
                Pending::Collection { major, count } => {
                    if let Some(open) = self.open.iter().position(|c| c.seq == self.popped) {
                        let resolve = match self.options.collection_behaviour {
                            CollectionBehaviour::AlwaysDefinite => false,
                            CollectionBehaviour::DefiniteWherePossible => force,
                            CollectionBehaviour::AlwaysIndefinite => true,
                        };
                        if !resolve {
                            self.queue.push_front(item);
                            break;
                        }
                        self.open[open].items = -1;
                        self.writer.write_all(&[header::initial(*major, header::INDEFINITE)])?;
                    } else if *count < 0 {
                        self.writer.write_all(&[header::initial(*major, header::INDEFINITE)])?;
                    } else {
                        header::write_head(&mut self.writer, *major, *count as u64)?;
                    }
                }
            }
            self.popped += 1;
        }
        self.writer.flush()?;
        Ok(())
    }

}

#[inline]
fn to_u64(len: usize) -> Result<u64, EncodeError> {
    u64::try_from(len).map_err(|_| EncodeError::Length(len))
}

/// The big-endian bytes of `value` at the smallest of the four head widths.
fn minimal_be_bytes(value: u64) -> Vec<u8> {
    if value <= u8::MAX as u64 {
        vec![value as u8]
    } else if value <= u16::MAX as u64 {
        (value as u16).to_be_bytes().to_vec()
    } else if value <= u32::MAX as u64 {
        (value as u32).to_be_bytes().to_vec()
    } else {
        value.to_be_bytes().to_vec()
    }
}
