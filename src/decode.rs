//! Pull-based decoding of a CBOR byte stream into tokens. The decoder keeps a
//! stack of open container contexts; the current context is simply the top of
//! that stack. Each [`Decoder::advance`] call resolves one initial byte into
//! at most one visible token, closing definite containers whose remaining
//! count has run out before consuming further input.

use crate::error::DecodeError;
use crate::header::{self, MajorType};
use crate::stream::ByteReader;
use crate::tags::{TagDecoder, TagTable, TimeZonePolicy};
use crate::token::Token;
use std::io::Read;

/// Options recognized by the [`Decoder`].
#[derive(Debug, Clone)]
pub struct DecoderOptions {
    /// How offset-less tag 0 timestamp literals are interpreted.
    pub time_zone: TimeZonePolicy,
    /// Compatibility switch for binary payloads written by a historical
    /// byte-order-broken writer. Deprecated; retained so that documents
    /// carrying the quirk remain acceptable, it alters no CBOR decode path.
    pub legacy_binary_compatibility: bool,
    /// Whether closing the decoder also closes (drops) the underlying stream.
    pub close_input: bool,
}

impl Default for DecoderOptions {
    fn default() -> DecoderOptions {
        DecoderOptions {
            time_zone: TimeZonePolicy::default(),
            legacy_binary_compatibility: false,
            close_input: true,
        }
    }
}

/// The remaining extent of an open container: a slot count declared upfront,
/// or indefinite until an explicit break.
enum Length {
    Definite(u64),
    Indefinite,
}

/// One open container. Maps count key and value slots separately, so their
/// declared entry count is doubled on push; the consumed-slot counter decides
/// whether a key or a value is expected next.
struct Context {
    major: MajorType,
    remaining: Length,
    slots: u64,
}

/// The outcome of one dispatch: a visible token, a clean end of stream, or
/// invisible structural progress (an indefinite string header or its closing
/// break) after which dispatch must run again. Flat, so arbitrarily long runs
/// of invisible items consume no call stack.
enum Step {
    Token(Token),
    End,
    Dispatch,
}

/// Decodes a CBOR byte stream into a lazy, finite, non-restartable sequence
/// of [`Token`]s. Forward-only and single-threaded; independent decoders over
/// independent streams share nothing.
pub struct Decoder<R: Read> {
    reader: ByteReader<R>,
    stack: Vec<Context>,
    tags: TagTable,
    options: DecoderOptions,
}

impl<R: Read> Decoder<R> {

    pub fn new(reader: R) -> Decoder<R> {
        Decoder::with_options(reader, DecoderOptions::default())
    }

    pub fn with_options(reader: R, options: DecoderOptions) -> Decoder<R> {
        Decoder {
            reader: ByteReader::new(reader),
            stack: Vec::new(),
            tags: TagTable::default(),
            options,
        }
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    /// Registers a decode transform for a tag number, replacing any built-in
    /// entry for that tag.
    pub fn register_tag(&mut self, tag: u64, decoder: TagDecoder) {
        self.tags.register(tag, decoder);
    }

    /// Decodes the next token. `Ok(None)` means the stream ended cleanly at a
    /// top-level item boundary; running out of bytes anywhere else is
    /// [`DecodeError::Eof`].
    pub fn advance(&mut self) -> Result<Option<Token>, DecodeError> {
        loop {
            let key_position = matches!(
                self.stack.last(),
                Some(ctx) if ctx.major == MajorType::Map && ctx.slots % 2 == 0
            );
            let step = if key_position {
                Step::Token(self.parse_key()?)
            } else {
                self.parse_value()?
            };
            match step {
                Step::Token(token) => return Ok(Some(token)),
                Step::End => return Ok(None),
                // an indefinite string opened or closed; nothing visible yet
                Step::Dispatch => {}
            }
        }
    }

    /// Closes the decoder, returning the underlying stream unless the options
    /// ask for it to be closed as well.
    pub fn close(self) -> Option<R> {
        if self.options.close_input {
            None
        } else {
            Some(self.reader.into_inner())
        }
    }

    fn parse_value(&mut self) -> Result<Step, DecodeError> {
        // a definite container whose count ran out closes here, without
        // consuming any bytes
        let closed = match self.stack.last_mut() {
            Some(top) => match top.remaining {
                Length::Definite(0) => Some(top.major),
                Length::Definite(ref mut n) => {
                    *n -= 1;
                    top.slots += 1;
                    None
                }
                Length::Indefinite => {
                    top.slots += 1;
                    None
                }
            },
            None => None,
        };
        if let Some(major) = closed {
            self.stack.pop();
            return Ok(Step::Token(match major {
                MajorType::Map => Token::EndMap,
                _ => Token::EndArray,
            }));
        }

        let byte = if self.stack.is_empty() {
            match self.reader.probe_u8()? {
                Some(byte) => byte,
                None => return Ok(Step::End),
            }
        } else {
            self.reader.read_u8()?
        };
        let (mut major, mut info) = header::split(byte);

        if let Some(top) = self.stack.last() {
            if matches!(top.major, MajorType::ByteString | MajorType::TextString)
                && major != top.major
                && !(major == MajorType::Primitive && info == header::BREAK)
            {
                return Err(DecodeError::Nesting("indefinite string chunk has mismatched major type"));
            }
        }

        let mut tag = None;
        if major == MajorType::Tag {
            tag = Some(self.reader.read_uint(info)?);
            let (m, i) = header::split(self.reader.read_u8()?);
            if m == MajorType::Tag {
                return Err(DecodeError::Nesting("an item may carry at most one tag"));
            }
            major = m;
            info = i;
        }

        let token = match major {
            MajorType::UnsignedInteger => {
                let magnitude = self.reader.read_uint(info)?;
                if magnitude <= i32::MAX as u64 {
                    Token::I32(magnitude as i32)
                } else if magnitude <= i64::MAX as u64 {
                    Token::I64(magnitude as i64)
                } else {
                    Token::U64(magnitude)
                }
            }
            MajorType::NegativeInteger => {
                let magnitude = self.reader.read_uint(info)?;
                if magnitude > i64::MAX as u64 {
                    return Err(DecodeError::IntegerOverflow);
                }
                let value = -1 - magnitude as i64;
                if value >= i32::MIN as i64 {
                    Token::I32(value as i32)
                } else {
                    Token::I64(value)
                }
            }
            MajorType::ByteString | MajorType::TextString => {
                if info == header::INDEFINITE {
                    if let Some(top) = self.stack.last() {
                        if top.major == major {
                            return Err(DecodeError::Nesting("indefinite string may not nest another indefinite string"));
                        }
                    }
                    self.stack.push(Context { major, remaining: Length::Indefinite, slots: 0 });
                    // chunks surface as plain string tokens on subsequent
                    // dispatches and are always raw: the header itself is
                    // invisible and a tag in front of it is discarded
                    return Ok(Step::Dispatch);
                }
                let len = to_usize(self.reader.read_uint(info)?)?;
                let buf = self.reader.read_exact_vec(len)?;
                if major == MajorType::ByteString {
                    Token::Bytes(buf)
                } else {
                    Token::Str(String::from_utf8(buf).map_err(|e| DecodeError::Utf8(e.utf8_error()))?)
                }
            }
            MajorType::Array => {
                let remaining = if info == header::INDEFINITE {
                    Length::Indefinite
                } else {
                    Length::Definite(self.reader.read_uint(info)?)
                };
                self.stack.push(Context { major, remaining, slots: 0 });
                Token::StartArray
            }
            MajorType::Map => {
                let remaining = if info == header::INDEFINITE {
                    Length::Indefinite
                } else {
                    // each entry occupies a key slot and a value slot
                    let entries = self.reader.read_uint(info)?;
                    Length::Definite(entries.checked_mul(2).ok_or(DecodeError::IntegerOverflow)?)
                };
                self.stack.push(Context { major, remaining, slots: 0 });
                Token::StartMap
            }
            MajorType::Tag => return Err(DecodeError::Nesting("an item may carry at most one tag")),
            MajorType::Primitive => match info {
                header::FALSE => Token::Bool(false),
                header::TRUE => Token::Bool(true),
                header::NULL => Token::Null,
                header::UNDEFINED => Token::Undefined,
                header::HALF_FLOAT => Token::F64(decode_half(self.reader.read_u16_be()?)),
                header::SINGLE_FLOAT => Token::F32(self.reader.read_f32_be()?),
                header::DOUBLE_FLOAT => Token::F64(self.reader.read_f64_be()?),
                header::BREAK => {
                    match self.stack.last() {
                        Some(top) if matches!(top.remaining, Length::Indefinite) => {}
                        _ => return Err(DecodeError::Nesting("break outside an indefinite-length context")),
                    }
                    return match self.stack.pop().map(|ctx| ctx.major) {
                        Some(MajorType::Array) => Ok(Step::Token(Token::EndArray)),
                        Some(MajorType::Map) => Ok(Step::Token(Token::EndMap)),
                        // a chunked string closes silently; the next dispatch
                        // continues at the parent level
                        _ => Ok(Step::Dispatch),
                    };
                }
                28..=30 => return Err(DecodeError::InvalidMinorType(info)),
                other => return Err(DecodeError::UnsupportedSimple(other)),
            },
        };

        Ok(Step::Token(match tag {
            Some(tag) => self.tags.apply(tag, token, self.options.time_zone)?,
            None => token,
        }))
    }

    /// Reads a map key. Keys must be definite-length text strings; a tag in
    /// front of a key is consumed but carries no meaning here.
    fn parse_key(&mut self) -> Result<Token, DecodeError> {
        let exhausted = match self.stack.last_mut() {
            Some(top) => match top.remaining {
                Length::Definite(0) => true,
                Length::Definite(ref mut n) => {
                    *n -= 1;
                    top.slots += 1;
                    false
                }
                Length::Indefinite => {
                    top.slots += 1;
                    false
                }
            },
            None => false,
        };
        if exhausted {
            self.stack.pop();
            return Ok(Token::EndMap);
        }

        let (mut major, mut info) = header::split(self.reader.read_u8()?);
        if major == MajorType::Tag {
            let _ = self.reader.read_uint(info)?;
            let (m, i) = header::split(self.reader.read_u8()?);
            major = m;
            info = i;
        }

        if major == MajorType::Primitive && info == header::BREAK {
            return match self.stack.pop() {
                Some(ctx) if matches!(ctx.remaining, Length::Indefinite) => Ok(Token::EndMap),
                _ => Err(DecodeError::Nesting("break inside a definite-length map")),
            };
        }
        if major != MajorType::TextString {
            return Err(DecodeError::Key(major.name()));
        }
        if info == header::INDEFINITE {
            return Err(DecodeError::Nesting("map key may not be an indefinite-length string"));
        }

        let len = to_usize(self.reader.read_uint(info)?)?;
        let buf = self.reader.read_exact_vec(len)?;
        let name = String::from_utf8(buf).map_err(|e| DecodeError::Utf8(e.utf8_error()))?;
        Ok(Token::Key(name))
    }

}

impl<R: Read> Iterator for Decoder<R> {
    type Item = Result<Token, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}

#[inline]
fn to_usize(value: u64) -> Result<usize, DecodeError> {
    usize::try_from(value).map_err(|_| DecodeError::Length(value))
}

/// Half-precision decode per RFC 7049 Appendix D: subnormals are scaled by
/// 2⁻²⁴, normals carry an implicit leading bit and are scaled by 2^(exp−25),
/// an all-ones exponent yields infinity or NaN.
fn decode_half(bits: u16) -> f64 {
    let exp = (bits >> 10) & 0x1f;
    let mant = (bits & 0x3ff) as f64;
    let magnitude = if exp == 0 {
        mant * 2f64.powi(-24)
    } else if exp != 31 {
        (mant + 1024.0) * 2f64.powi(exp as i32 - 25)
    } else if mant == 0.0 {
        f64::INFINITY
    } else {
        f64::NAN
    };
    if bits & 0x8000 != 0 { -magnitude } else { magnitude }
}

#[cfg(test)]
mod tests {
    use super::{decode_half, Decoder, DecoderOptions};
    use crate::error::DecodeError;
    use crate::tags::TimeZonePolicy;
    use crate::token::Token;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn decode_all(data: &[u8]) -> Vec<Token> {
        Decoder::new(data).collect::<Result<Vec<_>, _>>().unwrap()
    }

    fn decode_err(data: &[u8]) -> DecodeError {
        Decoder::new(data).collect::<Result<Vec<_>, _>>().unwrap_err()
    }

    #[test]
    fn single_object() {
        assert_eq!(
            vec![Token::StartMap, Token::Key("Blah".to_string()), Token::I32(1), Token::EndMap],
            decode_all(&[0xa1, 0x64, 0x42, 0x6c, 0x61, 0x68, 0x01])
        );
    }

    #[test]
    fn string_array() {
        assert_eq!(
            vec![
                Token::StartArray,
                Token::Str("a".to_string()),
                Token::Str("b".to_string()),
                Token::Str("c".to_string()),
                Token::EndArray,
            ],
            decode_all(&[0x83, 0x61, 0x61, 0x61, 0x62, 0x61, 0x63])
        );
    }

    #[test]
    fn mixed_values() {
        let mut data = vec![
            0x8b,
            0x1b, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0x1a, 0x7f, 0xff, 0xff, 0xff,
            0x18, 0xff,
            0x18, 0x7f,
            0x61, 0x61,
            0xfb, 0x7f, 0xef, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xfa, 0x7f, 0x7f, 0xff, 0xff,
            0xf5,
            0x45, 0x00, 0x01, 0x02, 0x03, 0x04,
            0xc0, 0x78, 0x19,
        ];
        data.extend_from_slice(b"2000-12-29T12:30:00+00:00");
        data.extend_from_slice(&[0xc1, 0x1a, 0x3a, 0x4c, 0x83, 0xc8]);

        // the deprecated compatibility switch is recognized but changes nothing
        let options = DecoderOptions {
            time_zone: TimeZonePolicy::TreatAsUtc,
            legacy_binary_compatibility: true,
            ..DecoderOptions::default()
        };
        let date = Utc.with_ymd_and_hms(2000, 12, 29, 12, 30, 0).unwrap();
        assert_eq!(
            vec![
                Token::StartArray,
                Token::I64(i64::MAX),
                Token::I32(i32::MAX),
                Token::I32(255),
                Token::I32(127),
                Token::Str("a".to_string()),
                Token::F64(f64::MAX),
                Token::F32(f32::MAX),
                Token::Bool(true),
                Token::Bytes(vec![0, 1, 2, 3, 4]),
                Token::Date(date),
                Token::Date(date),
                Token::EndArray,
            ],
            Decoder::with_options(data.as_slice(), options).collect::<Result<Vec<_>, _>>().unwrap()
        );
    }

    #[test]
    fn integer_narrowing() {
        assert_eq!(vec![Token::I32(0)], decode_all(&[0x00]));
        assert_eq!(vec![Token::I32(-1)], decode_all(&[0x20]));
        assert_eq!(vec![Token::I32(-100)], decode_all(&[0x38, 0x63]));
        assert_eq!(vec![Token::I64(i32::MAX as i64 + 1)], decode_all(&[0x1a, 0x80, 0x00, 0x00, 0x00]));
        assert_eq!(vec![Token::U64(u64::MAX)], decode_all(&[0x1b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]));
        assert_eq!(
            vec![Token::I64(i64::MIN)],
            decode_all(&[0x3b, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff])
        );
        assert!(matches!(
            decode_err(&[0x3b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]),
            DecodeError::IntegerOverflow
        ));
    }

    #[test]
    fn nested_containers() {
        assert_eq!(
            vec![
                Token::StartArray,
                Token::StartArray,
                Token::I32(1),
                Token::EndArray,
                Token::StartMap,
                Token::Key("b".to_string()),
                Token::I32(2),
                Token::EndMap,
                Token::EndArray,
            ],
            decode_all(&[0x82, 0x81, 0x01, 0xa1, 0x61, 0x62, 0x02])
        );
    }

    #[test]
    fn empty_containers() {
        assert_eq!(vec![Token::StartArray, Token::EndArray], decode_all(&[0x80]));
        assert_eq!(vec![Token::StartMap, Token::EndMap], decode_all(&[0xa0]));
    }

    #[test]
    fn indefinite_array() {
        assert_eq!(
            vec![Token::StartArray, Token::I32(1), Token::I32(2), Token::EndArray],
            decode_all(&[0x9f, 0x01, 0x02, 0xff])
        );
        // indefinite and definite encodings of the same content are equivalent
        assert_eq!(decode_all(&[0x82, 0x01, 0x02]), decode_all(&[0x9f, 0x01, 0x02, 0xff]));
    }

    #[test]
    fn indefinite_map() {
        assert_eq!(
            vec![Token::StartMap, Token::Key("a".to_string()), Token::I32(1), Token::EndMap],
            decode_all(&[0xbf, 0x61, 0x61, 0x01, 0xff])
        );
        assert_eq!(decode_all(&[0xa1, 0x61, 0x61, 0x01]), decode_all(&[0xbf, 0x61, 0x61, 0x01, 0xff]));
    }

    #[test]
    fn chunked_strings() {
        assert_eq!(
            vec![Token::Str("ab".to_string()), Token::Str("cd".to_string())],
            decode_all(&[0x7f, 0x62, 0x61, 0x62, 0x62, 0x63, 0x64, 0xff])
        );
        assert_eq!(
            vec![Token::StartArray, Token::Bytes(vec![1]), Token::Bytes(vec![2, 3]), Token::I32(5), Token::EndArray],
            decode_all(&[0x82, 0x5f, 0x41, 0x01, 0x42, 0x02, 0x03, 0xff, 0x05])
        );
    }

    #[test]
    fn long_run_of_empty_chunked_strings() {
        // an empty chunked string produces no token at all; a long run of
        // them must not grow the call stack
        let mut data = Vec::new();
        for _ in 0..10_000 {
            data.extend_from_slice(&[0x5f, 0xff]);
        }
        data.push(0x01);
        assert_eq!(vec![Token::I32(1)], decode_all(&data));
    }

    #[test]
    fn tag_before_chunked_string_is_discarded() {
        // tag 0 applied to "a" would fail to parse as a date; in front of an
        // indefinite header the tag is dropped and the chunks stay raw
        assert_eq!(
            vec![Token::Str("a".to_string())],
            decode_all(&[0xc0, 0x7f, 0x61, 0x61, 0xff])
        );
    }

    #[test]
    fn chunk_type_mismatch() {
        assert!(matches!(decode_err(&[0x5f, 0x61, 0x61, 0xff]), DecodeError::Nesting(_)));
    }

    #[test]
    fn nested_indefinite_string() {
        assert!(matches!(decode_err(&[0x5f, 0x5f]), DecodeError::Nesting(_)));
    }

    #[test]
    fn stray_break() {
        assert!(matches!(decode_err(&[0xff]), DecodeError::Nesting(_)));
        // break cannot close a definite container
        assert!(matches!(decode_err(&[0x82, 0x01, 0xff]), DecodeError::Nesting(_)));
    }

    #[test]
    fn truncated_streams() {
        assert!(matches!(decode_err(&[0x19]), DecodeError::Eof));
        assert!(matches!(decode_err(&[0x62, 0x61]), DecodeError::Eof));
        assert!(matches!(decode_err(&[0xa1]), DecodeError::Eof));
        assert!(matches!(decode_err(&[0x82, 0x01]), DecodeError::Eof));
    }

    #[test]
    fn clean_end() {
        assert_eq!(Vec::<Token>::new(), decode_all(&[]));
        // several root items in one stream
        assert_eq!(vec![Token::I32(1), Token::Str("hi".to_string())], decode_all(&[0x01, 0x62, 0x68, 0x69]));
    }

    #[test]
    fn reserved_minor_types() {
        assert!(matches!(decode_err(&[0x1c]), DecodeError::InvalidMinorType(28)));
        assert!(matches!(decode_err(&[0xfd]), DecodeError::InvalidMinorType(29)));
    }

    #[test]
    fn unrecognized_simple_values() {
        assert!(matches!(decode_err(&[0xe0]), DecodeError::UnsupportedSimple(0)));
        assert!(matches!(decode_err(&[0xf8]), DecodeError::UnsupportedSimple(24)));
    }

    #[test]
    fn map_key_must_be_text() {
        assert!(matches!(decode_err(&[0xa1, 0x01, 0x01]), DecodeError::Key("unsigned integer")));
        assert!(matches!(
            decode_err(&[0xa1, 0x7f, 0x61, 0x61, 0xff, 0x01]),
            DecodeError::Nesting(_)
        ));
    }

    #[test]
    fn tag_before_key_is_skipped() {
        assert_eq!(
            vec![Token::StartMap, Token::Key("a".to_string()), Token::I32(1), Token::EndMap],
            decode_all(&[0xa1, 0xd8, 0x55, 0x61, 0x61, 0x01])
        );
    }

    #[test]
    fn unknown_tags_pass_through() {
        assert_eq!(vec![Token::I32(1)], decode_all(&[0xc6, 0x01]));
        assert_eq!(
            vec![Token::I32(1)],
            decode_all(&[0xdb, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01])
        );
        // tag 0 on a non-string leaves the value alone
        assert_eq!(vec![Token::I32(1)], decode_all(&[0xc0, 0x01]));
    }

    #[test]
    fn nested_tags_rejected() {
        assert!(matches!(decode_err(&[0xc6, 0xc6, 0x01]), DecodeError::Nesting(_)));
    }

    #[test]
    fn date_text_tag() {
        let mut data = vec![0xc0, 0x74];
        data.extend_from_slice(b"2000-12-20 12:59:59Z");
        assert_eq!(
            vec![Token::Date(Utc.with_ymd_and_hms(2000, 12, 20, 12, 59, 59).unwrap())],
            decode_all(&data)
        );
    }

    #[test]
    fn uuid_tag() {
        let data = [
            0x81, 0xd8, 0x25, 0x50,
            0xd7, 0xee, 0x21, 0xd8, 0x5c, 0x4b, 0xc9, 0x43,
            0x8a, 0xc2, 0x69, 0x28, 0xe5, 0x79, 0xb7, 0x05,
        ];
        assert_eq!(
            vec![
                Token::StartArray,
                Token::Uuid(Uuid::parse_str("d821eed7-4b5c-43c9-8ac2-6928e579b705").unwrap()),
                Token::EndArray,
            ],
            decode_all(&data)
        );
    }

    #[test]
    fn uuid_tag_wrong_length() {
        assert!(matches!(
            decode_err(&[0xd8, 0x25, 0x43, 0x01, 0x02, 0x03]),
            DecodeError::UuidLength(3)
        ));
    }

    #[test]
    fn half_float_boundaries() {
        assert_eq!(0.0, decode_half(0x0000));
        assert!(decode_half(0x0000).is_sign_positive());
        assert_eq!(0.0, decode_half(0x8000));
        assert!(decode_half(0x8000).is_sign_negative());
        assert_eq!(2f64.powi(-24), decode_half(0x0001));
        assert_eq!(65504.0, decode_half(0x7bff));
        assert_eq!(1.0, decode_half(0x3c00));
        assert_eq!(-4.0, decode_half(0xc400));
        assert_eq!(f64::INFINITY, decode_half(0x7c00));
        assert_eq!(f64::NEG_INFINITY, decode_half(0xfc00));
        assert!(decode_half(0x7e00).is_nan());
    }

    #[test]
    fn half_float_tokens() {
        assert_eq!(vec![Token::F64(1.0)], decode_all(&[0xf9, 0x3c, 0x00]));
        assert_eq!(vec![Token::F64(f64::INFINITY)], decode_all(&[0xf9, 0x7c, 0x00]));
    }

    #[test]
    fn close_returns_stream() {
        let data = [0x01u8];
        let options = DecoderOptions { close_input: false, ..DecoderOptions::default() };
        let decoder = Decoder::with_options(data.as_slice(), options);
        assert!(decoder.close().is_some());
        let decoder = Decoder::new(data.as_slice());
        assert!(decoder.close().is_none());
    }

}
