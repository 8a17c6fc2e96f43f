//! A streaming codec between an ordered token stream and the Concise Binary
//! Object Representation, the binary data format defined in RFC 7049.
//!
//! Neither direction materializes a document tree. The [`Decoder`] pulls one
//! [`Token`] at a time out of any [`std::io::Read`], the [`Encoder`] pushes
//! tokens into any [`std::io::Write`], deferring collection heads until their
//! item count is known so that definite-length encodings can be produced from
//! a forward-only token source.
//!
//! ```
//! use cbor_stream::{Decoder, Encoder, Token};
//!
//! let mut buf = Vec::new();
//! let mut encoder = Encoder::new(&mut buf);
//! encoder.start_map().unwrap();
//! encoder.write_key("key").unwrap();
//! encoder.write_str("value").unwrap();
//! encoder.end_map().unwrap();
//! encoder.close().unwrap();
//! assert_eq!(buf, vec![
//!     0xa1,                         // map of length 1
//!     0x63, 0x6b, 0x65, 0x79,       // text string "key"
//!     0x65, 0x76, 0x61, 0x6c,       // text string "value"
//!     0x75, 0x65,
//! ]);
//!
//! let mut decoder = Decoder::new(buf.as_slice());
//! assert_eq!(Some(Token::StartMap), decoder.advance().unwrap());
//! assert_eq!(Some(Token::Key("key".to_string())), decoder.advance().unwrap());
//! assert_eq!(Some(Token::Str("value".to_string())), decoder.advance().unwrap());
//! assert_eq!(Some(Token::EndMap), decoder.advance().unwrap());
//! assert_eq!(None, decoder.advance().unwrap());
//! ```
//!
//! Beyond the core grammar, the semantic tags 0 and 1 (date-times), and 37
//! (UUIDs) are resolved into dedicated tokens by default; unrecognized tags
//! are dropped and their payload passed through. The tag table is extensible
//! through [`Decoder::register_tag`].

mod decode;
mod encode;
mod error;
mod header;
mod stream;
mod tags;
mod token;

pub use decode::{Decoder, DecoderOptions};
pub use encode::{CollectionBehaviour, Encoder, EncoderOptions};
pub use error::{DecodeError, EncodeError};
pub use header::MajorType;
pub use tags::{
    DateTimeEncoding, TagDecoder, TagTable, TimeZonePolicy, TAG_DATE_TIME_EPOCH,
    TAG_DATE_TIME_STRING, TAG_UUID,
};
pub use token::Token;
