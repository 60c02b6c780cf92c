//! CSV record protocol parser and response generator.
//!
//! Each message is a single line of five comma-separated fields:
//!
//! ```text
//! Request:  <x>,<y>,<z>,<scalar>,<tag>
//! Response: <x>,<y>,<z>,<canonical scalar>,<tag>\r\n
//! ```
//!
//! `x`, `y` and `z` are opaque text passed through untouched. `scalar` must
//! parse as an `f64` and `tag` as an `i64`; both are re-rendered in their
//! canonical form on the way back. The literal line `Disconnect` asks the
//! server to close the connection.

use bytes::BytesMut;
use std::str;

/// Literal line that ends a session
pub const SENTINEL: &str = "Disconnect";

/// Number of fields in a record
pub const FIELD_COUNT: usize = 5;

/// A single parsed record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub x: String,
    pub y: String,
    pub z: String,
    pub scalar: f64,
    pub tag: i64,
}

/// Classified message received from the peer
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// The peer asked to close the connection
    Disconnect,
    /// A well-formed record to echo back
    Record(Record),
}

/// Malformed message errors
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Received bytes are not valid UTF-8
    InvalidUtf8,
    /// Fewer than five fields
    MissingFields(usize),
    /// More than five fields
    TooManyFields(usize),
    /// Scalar field is not a float
    InvalidScalar(String),
    /// Tag field is not an integer
    InvalidTag(String),
    /// Response cannot be encoded as ASCII
    NonAscii,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidUtf8 => write!(f, "Message is not valid UTF-8"),
            ParseError::MissingFields(n) => {
                write!(f, "Expected {} fields, found {}", FIELD_COUNT, n)
            }
            ParseError::TooManyFields(n) => {
                write!(f, "Expected {} fields, found {}", FIELD_COUNT, n)
            }
            ParseError::InvalidScalar(s) => write!(f, "Invalid scalar: {:?}", s),
            ParseError::InvalidTag(s) => write!(f, "Invalid tag: {:?}", s),
            ParseError::NonAscii => write!(f, "Response contains non-ASCII characters"),
        }
    }
}

impl std::error::Error for ParseError {}

/// CSV record parser
pub struct Parser;

impl Parser {
    /// Decode a received chunk as text.
    pub fn decode(input: &[u8]) -> Result<&str, ParseError> {
        str::from_utf8(input).map_err(|_| ParseError::InvalidUtf8)
    }

    /// Split decoded text into record segments.
    ///
    /// Segments are separated by `\n` with an optional `\r` before it. Empty
    /// segments are skipped. Text without any newline is one segment.
    pub fn segments(text: &str) -> impl Iterator<Item = &str> {
        text.split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.is_empty())
    }

    /// Parse a single segment into a message.
    pub fn parse(segment: &str) -> Result<Message, ParseError> {
        if segment == SENTINEL {
            return Ok(Message::Disconnect);
        }
        Self::parse_record(segment).map(Message::Record)
    }

    /// Parse a segment as a five-field record.
    pub fn parse_record(segment: &str) -> Result<Record, ParseError> {
        let fields: Vec<&str> = segment.split(',').collect();

        if fields.len() < FIELD_COUNT {
            return Err(ParseError::MissingFields(fields.len()));
        }
        if fields.len() > FIELD_COUNT {
            return Err(ParseError::TooManyFields(fields.len()));
        }

        let scalar: f64 = fields[3]
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidScalar(fields[3].to_string()))?;

        let tag: i64 = fields[4]
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidTag(fields[4].to_string()))?;

        Ok(Record {
            x: fields[0].to_string(),
            y: fields[1].to_string(),
            z: fields[2].to_string(),
            scalar,
            tag,
        })
    }
}

/// Response generator
pub struct Response;

impl Response {
    /// Format the echo line for a record, terminated by `\r\n`.
    pub fn record(record: &Record) -> Result<BytesMut, ParseError> {
        let line = format!(
            "{},{},{},{},{}\r\n",
            record.x,
            record.y,
            record.z,
            Self::canonical_scalar(record.scalar),
            record.tag
        );

        if !line.is_ascii() {
            return Err(ParseError::NonAscii);
        }

        Ok(BytesMut::from(line.as_bytes()))
    }

    /// Render a float as the shortest text that parses back to the same value.
    ///
    /// Whole numbers keep a trailing `.0` and very large or very small
    /// magnitudes switch to exponent notation.
    pub fn canonical_scalar(value: f64) -> String {
        format!("{:?}", value)
    }
}
