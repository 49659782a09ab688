//! Publish-block and messages-block grammar.
//!
//! Both directions of the wire share one grammar: a block is a
//! concatenation of zero or more entries, each
//!
//! ```text
//! MESSAGE <topic1> ... <topicK> <payload_bytes>\r\n<payload>\r\n
//! ```
//!
//! Within an entry header, successive space-separated tokens are topic
//! names except the last token, which is the payload length in ASCII
//! decimal. At least one topic token is required. Payloads are 8-bit
//! clean because their length is explicit.

use crate::message::{Delivery, Topic};
use crate::protocol::constants::ENTRY_KEYWORD;
use crate::protocol::error::{ProtocolError, ProtocolResult};
use bytes::{BufMut, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// Parse a block of concatenated `MESSAGE` entries.
///
/// An empty block parses to an empty list.
///
/// # Errors
/// Returns an error if any entry violates the grammar: missing keyword,
/// no topic token, non-decimal length, truncated payload, or a payload
/// not followed by CRLF.
pub fn parse_block(block: &[u8]) -> ProtocolResult<Vec<Delivery>> {
    let mut entries = Vec::new();
    let mut rest = block;

    while !rest.is_empty() {
        let header_end = find_crlf(rest)
            .ok_or_else(|| ProtocolError::malformed_entry("entry header missing CRLF"))?;
        let header = std::str::from_utf8(&rest[..header_end])
            .map_err(|_| ProtocolError::malformed_entry("entry header is not valid UTF-8"))?;

        let (topics, payload_len) = parse_header(header)?;

        let body = &rest[header_end + CRLF.len()..];
        // Compared without adding to the length token, which is
        // attacker-controlled and may be near usize::MAX.
        if payload_len > body.len().saturating_sub(CRLF.len()) {
            return Err(ProtocolError::malformed_entry(format!(
                "truncated payload: announced {payload_len} bytes, {} available",
                body.len().saturating_sub(CRLF.len())
            )));
        }

        let payload = &body[..payload_len];
        if &body[payload_len..payload_len + CRLF.len()] != CRLF {
            return Err(ProtocolError::malformed_entry("payload not terminated by CRLF"));
        }

        entries.push(Delivery::new(topics, Bytes::copy_from_slice(payload)));
        rest = &body[payload_len + CRLF.len()..];
    }

    Ok(entries)
}

/// Serialize entries into one block, the exact inverse of [`parse_block`].
#[must_use]
pub fn encode_block(entries: &[Delivery]) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_block_len(entries));
    for entry in entries {
        buf.put_slice(ENTRY_KEYWORD.as_bytes());
        for topic in &entry.topics {
            buf.put_u8(b' ');
            buf.put_slice(topic.as_bytes());
        }
        buf.put_u8(b' ');
        buf.put_slice(entry.payload.len().to_string().as_bytes());
        buf.put_slice(CRLF);
        buf.put_slice(&entry.payload);
        buf.put_slice(CRLF);
    }
    buf.freeze()
}

/// Length in bytes of the block [`encode_block`] would produce.
#[must_use]
pub fn encoded_block_len(entries: &[Delivery]) -> usize {
    entries
        .iter()
        .map(|entry| {
            ENTRY_KEYWORD.len()
                + entry.topics.iter().map(|t| 1 + t.as_bytes().len()).sum::<usize>()
                + 1
                + decimal_width(entry.payload.len())
                + CRLF.len()
                + entry.payload.len()
                + CRLF.len()
        })
        .sum()
}

/// Split an entry header into topic tokens and the trailing length token.
fn parse_header(header: &str) -> ProtocolResult<(Vec<Topic>, usize)> {
    let mut tokens = header.split(' ');

    if tokens.next() != Some(ENTRY_KEYWORD) {
        return Err(ProtocolError::malformed_entry(format!(
            "entry header does not start with {ENTRY_KEYWORD}: {header:?}"
        )));
    }

    let rest: Vec<&str> = tokens.collect();
    // Last token is the payload length; everything before it is a topic.
    let (&len_token, topic_tokens) = rest
        .split_last()
        .ok_or_else(|| ProtocolError::malformed_entry("entry header has no length token"))?;

    if topic_tokens.is_empty() {
        return Err(ProtocolError::malformed_entry("entry header has no topic token"));
    }

    let payload_len: usize = len_token.parse().map_err(|_| {
        ProtocolError::malformed_entry(format!("invalid payload length token: {len_token:?}"))
    })?;

    let topics = topic_tokens
        .iter()
        .map(|t| {
            Topic::new(*t).map_err(|_| {
                ProtocolError::malformed_entry(format!("invalid topic token: {t:?}"))
            })
        })
        .collect::<ProtocolResult<Vec<Topic>>>()?;

    Ok((topics, payload_len))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn decimal_width(mut n: usize) -> usize {
    let mut width = 1;
    while n >= 10 {
        n /= 10;
        width += 1;
    }
    width
}
