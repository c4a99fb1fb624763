//! # Message
//!
//! Module dedicated to raw message inspection. The
//! [`MessageIdentifier`] is the only key used to match messages
//! across stores. Header parsing and charset decoding are delegated
//! to a [`MessageCodec`], the default one being [`MailParserCodec`].

mod error;

use std::{borrow::Borrow, fmt, ops::Deref};

use chrono::{DateTime, FixedOffset, TimeZone};
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};

#[doc(inline)]
pub use self::error::{Error, Result};

/// The name of the header holding the message identifier.
pub const IDENTIFIER_HEADER: &str = "Message-ID";

/// Three NUL bytes ending a file mark it as corrupted.
pub const CORRUPTION_SENTINEL: &[u8] = b"\0\0\0";

/// The message identifier.
///
/// Opaque, case-sensitive string taken from the `Message-ID` header.
/// It can only be built from a header value containing exactly one
/// whitespace-separated token.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageIdentifier(String);

impl MessageIdentifier {
    /// Build an identifier from an already decoded header value.
    pub fn from_header_value(value: impl AsRef<str>) -> Result<Self> {
        let value = value.as_ref();
        let mut tokens = value.split_whitespace();

        match (tokens.next(), tokens.next()) {
            (None, _) => Err(Error::EmptyIdentifierError),
            (Some(token), None) => Ok(Self(token.to_owned())),
            (Some(_), Some(_)) => Err(Error::MultiTokenIdentifierError(value.to_owned())),
        }
    }

    /// Build an identifier from a raw header line, as returned by a
    /// header-only fetch (`Message-ID: <id@host>`).
    ///
    /// A blank line means the message has no identifier header.
    pub fn from_header_line(line: &[u8], codec: &dyn MessageCodec) -> Result<Self> {
        let name_len = IDENTIFIER_HEADER.len() + 1;

        if line.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::MissingIdentifierError);
        }

        let is_identifier_header = line.len() >= name_len
            && line[..name_len - 1].eq_ignore_ascii_case(IDENTIFIER_HEADER.as_bytes())
            && line[name_len - 1] == b':';

        if !is_identifier_header {
            let line = String::from_utf8_lossy(line).into_owned();
            return Err(Error::InvalidIdentifierHeaderError(line));
        }

        Self::from_header_value(codec.decode_header_value(&line[name_len..]))
    }

    /// Derive the identifier of the nth copy of a duplicated message.
    pub fn with_copy_suffix(&self, nth: usize) -> Self {
        Self(format!("{}~{nth}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for MessageIdentifier {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for MessageIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for MessageIdentifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for MessageIdentifier {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for MessageIdentifier {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for MessageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The headers the engine cares about.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MessageHeaders {
    /// The decoded identifier header value, if any.
    pub identifier: Option<String>,

    /// The decoded subject, if any.
    pub subject: Option<String>,

    /// The parsed date, if any.
    pub date: Option<DateTime<FixedOffset>>,
}

impl MessageHeaders {
    /// Validate the identifier header value.
    pub fn identifier(&self) -> Result<MessageIdentifier> {
        match &self.identifier {
            None => Err(Error::MissingIdentifierError),
            Some(value) => MessageIdentifier::from_header_value(value),
        }
    }
}

/// The message codec.
///
/// Black-box capability used to parse headers and to normalize their
/// charset, so that identifiers extracted from both stores are
/// comparable.
pub trait MessageCodec: Send + Sync {
    /// Decode a raw header value (RFC 2047 encoded words, charsets).
    fn decode_header_value(&self, raw: &[u8]) -> String;

    /// Parse the header block of the given raw message.
    ///
    /// Implementations should not parse the body.
    fn parse_headers(&self, raw: &[u8]) -> MessageHeaders;
}

/// The default message codec, based on [`mail_parser`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MailParserCodec;

impl MessageCodec for MailParserCodec {
    fn decode_header_value(&self, raw: &[u8]) -> String {
        // mail-parser only decodes structured header values, so the
        // raw value is wrapped into a fake subject header
        let mut msg = Vec::with_capacity(raw.len() + 16);
        msg.extend_from_slice(b"Subject:");
        msg.extend_from_slice(raw);
        msg.extend_from_slice(b"\r\n\r\n");

        MessageParser::new()
            .parse(&msg)
            .and_then(|msg| msg.subject().map(ToOwned::to_owned))
            .unwrap_or_else(|| String::from_utf8_lossy(raw).trim().to_owned())
    }

    fn parse_headers(&self, raw: &[u8]) -> MessageHeaders {
        let block = header_block(raw);

        let identifier = find_header(block, IDENTIFIER_HEADER)
            .map(|value| self.decode_header_value(&value));

        let (subject, date) = match MessageParser::new().parse(block) {
            Some(msg) => (
                msg.subject().map(ToOwned::to_owned),
                msg.date().and_then(from_mail_parser_to_chrono_datetime),
            ),
            None => (None, None),
        };

        MessageHeaders {
            identifier,
            subject,
            date,
        }
    }
}

/// Return `true` if the given raw content ends with the corruption
/// sentinel.
pub fn is_corrupted(raw: &[u8]) -> bool {
    raw.ends_with(CORRUPTION_SENTINEL)
}

/// Extract the header block of a raw message, blank line included.
pub fn header_block(raw: &[u8]) -> &[u8] {
    let mut pos = 0;

    while pos < raw.len() {
        let end = raw[pos..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(raw.len(), |i| pos + i + 1);

        let line = &raw[pos..end];
        if line == b"\n" || line == b"\r\n" {
            return &raw[..end];
        }

        pos = end;
    }

    raw
}

/// Find the first occurrence of the given header in a header block
/// and return its raw, unfolded value.
pub fn find_header(block: &[u8], name: &str) -> Option<Vec<u8>> {
    let mut value: Option<Vec<u8>> = None;

    for line in block.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        match value.as_mut() {
            // continuation of the header being collected
            Some(value) if line.first().is_some_and(|b| *b == b' ' || *b == b'\t') => {
                value.extend_from_slice(line);
            }
            Some(_) => break,
            None => {
                let is_header = line.len() > name.len()
                    && line[..name.len()].eq_ignore_ascii_case(name.as_bytes())
                    && line[name.len()] == b':';

                if is_header {
                    value = Some(line[name.len() + 1..].to_vec());
                }
            }
        }
    }

    value
}

/// Transform a [`mail_parser::DateTime`] into a fixed offset
/// [`chrono::DateTime`].
pub fn from_mail_parser_to_chrono_datetime(
    dt: &mail_parser::DateTime,
) -> Option<DateTime<FixedOffset>> {
    let tz_secs = (dt.tz_hour as i32) * 3600 + (dt.tz_minute as i32) * 60;
    let tz_sign = if dt.tz_before_gmt { -1 } else { 1 };

    FixedOffset::east_opt(tz_sign * tz_secs)?
        .with_ymd_and_hms(
            dt.year as i32,
            dt.month as u32,
            dt.day as u32,
            dt.hour as u32,
            dt.minute as u32,
            dt.second as u32,
        )
        .earliest()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"From: Art Vandelay <art@vandelay.com>\r\n\
Message-ID:\r\n <folded@vandelay.com>\r\n\
Date: Sat, 20 Nov 2021 14:22:01 -0800\r\n\
Subject: Why not both importing AND exporting? =?utf-8?b?4pi6?=\r\n\
\r\n\
Message-ID: <body@vandelay.com>\r\n";

    #[test]
    fn identifier_from_header_value() {
        assert_eq!(
            MessageIdentifier::from_header_value(" <a@b>\r\n").unwrap().as_str(),
            "<a@b>"
        );
        assert_eq!(
            MessageIdentifier::from_header_value("  \r\n"),
            Err(Error::EmptyIdentifierError)
        );
        assert!(matches!(
            MessageIdentifier::from_header_value("<a@b> <c@d>"),
            Err(Error::MultiTokenIdentifierError(_))
        ));
    }

    #[test]
    fn identifier_from_header_line() {
        let codec = MailParserCodec;

        let id = MessageIdentifier::from_header_line(b"MESSAGE-ID: <x@y>\r\n\r\n", &codec);
        assert_eq!(id.unwrap().as_str(), "<x@y>");

        let id = MessageIdentifier::from_header_line(b"\r\n", &codec);
        assert_eq!(id, Err(Error::MissingIdentifierError));

        let id = MessageIdentifier::from_header_line(b"Subject: <x@y>\r\n", &codec);
        assert!(matches!(id, Err(Error::InvalidIdentifierHeaderError(_))));

        let id = MessageIdentifier::from_header_line(b"Message-ID:\r\n\r\n", &codec);
        assert_eq!(id, Err(Error::EmptyIdentifierError));
    }

    #[test]
    fn header_block_stops_at_blank_line() {
        let block = header_block(RAW);
        assert!(block.ends_with(b"\r\n\r\n"));
        assert!(!block.windows(4).any(|w| w == b"body"));
        assert_eq!(header_block(b"No-Body: here"), b"No-Body: here");
    }

    #[test]
    fn find_folded_header() {
        let value = find_header(header_block(RAW), IDENTIFIER_HEADER).unwrap();
        assert_eq!(value, b" <folded@vandelay.com>");
        assert_eq!(find_header(RAW, "X-Missing"), None);
    }

    #[test]
    fn parse_headers() {
        let headers = MailParserCodec.parse_headers(RAW);

        assert_eq!(headers.identifier().unwrap().as_str(), "<folded@vandelay.com>");
        assert_eq!(
            headers.subject.as_deref(),
            Some("Why not both importing AND exporting? ☺")
        );
        assert_eq!(
            headers.date.unwrap().to_rfc3339(),
            "2021-11-20T14:22:01-08:00"
        );
    }

    #[test]
    fn parse_headers_without_identifier() {
        let headers = MailParserCodec.parse_headers(b"Subject: hello\r\n\r\nbody");
        assert_eq!(headers.identifier(), Err(Error::MissingIdentifierError));
        assert_eq!(headers.date, None);
    }

    #[test]
    fn corruption_sentinel() {
        assert!(is_corrupted(b"Subject: x\r\n\r\nbody\0\0\0"));
        assert!(!is_corrupted(b"Subject: x\r\n\r\nbody\0\0"));
    }
}
