//! Request decoding and response encoding for the framed protocol.
//!
//! The decoder is a two-state machine driven by byte counts:
//!
//! 1. **LINE** (initial): awaiting a command line terminated by CRLF.
//! 2. **BODY**: reading exactly `remaining` bytes of framed payload (the
//!    announced `<bytes>` plus 2 for the trailing CRLF).
//!
//! Body bytes are never line-scanned because payloads may contain CRLF.
//! Receiving more bytes than a body announced is a protocol error.

use crate::message::{Delivery, Topic};
use crate::protocol::constants::{MAX_BODY_SIZE, MAX_LINE_LENGTH};
use crate::protocol::entry;
use crate::protocol::error::{ProtocolError, ProtocolResult};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

const CRLF: &[u8] = b"\r\n";

/// Store command carried by a `set` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCommand {
    /// Add topics to the client's subscription set.
    Subscribe,
    /// Remove topics from the client's subscription set.
    Unsubscribe,
    /// Publish a block of message entries.
    Publish,
}

impl StoreCommand {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            "publish" => Some(Self::Publish),
            _ => None,
        }
    }

    /// Wire token for this command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for StoreCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One fully decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `quit`: close the connection cleanly.
    Quit,
    /// `get messages`: drain the client's mailbox.
    FetchMessages,
    /// `set subscribe`: topics parsed from the framed payload.
    Subscribe(Vec<Topic>),
    /// `set unsubscribe`: topics parsed from the framed payload.
    Unsubscribe(Vec<Topic>),
    /// `set publish`: entries parsed from the framed publish-block.
    Publish(Vec<Delivery>),
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Line,
    Body { command: StoreCommand, remaining: usize },
}

enum LineOutcome {
    Request(Request),
    Body { command: StoreCommand, payload_len: usize },
}

/// Streaming request decoder.
///
/// Feed raw socket chunks in; complete requests come out in arrival
/// order. The decoder owns an accumulation buffer, so partial lines and
/// partial bodies across chunks are handled transparently. Any error is
/// protocol-fatal: the decoder must be discarded with its connection.
#[derive(Debug)]
pub struct RequestDecoder {
    buffer: BytesMut,
    state: DecodeState,
    requests_decoded: u64,
    bytes_consumed: u64,
}

impl RequestDecoder {
    /// Create a new decoder in LINE state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            state: DecodeState::Line,
            requests_decoded: 0,
            bytes_consumed: 0,
        }
    }

    /// Feed one chunk of socket bytes, returning every request completed
    /// by it.
    ///
    /// # Errors
    /// Returns an error on any framing violation: unknown command line,
    /// oversized line or body, excess body bytes, missing body
    /// terminator, or a malformed publish-block.
    pub fn feed(&mut self, chunk: &[u8]) -> ProtocolResult<Vec<Request>> {
        self.buffer.extend_from_slice(chunk);
        self.bytes_consumed += chunk.len() as u64;

        let mut requests = Vec::new();
        loop {
            match self.state {
                DecodeState::Line => {
                    let Some(pos) = find_crlf(&self.buffer) else {
                        if self.buffer.len() > MAX_LINE_LENGTH {
                            return Err(ProtocolError::LineTooLong {
                                actual: self.buffer.len(),
                                max: MAX_LINE_LENGTH,
                            });
                        }
                        break;
                    };

                    let line = self.buffer.split_to(pos + CRLF.len());
                    match parse_line(&line[..pos])? {
                        LineOutcome::Request(request) => {
                            self.requests_decoded += 1;
                            requests.push(request);
                        }
                        LineOutcome::Body { command, payload_len } => {
                            self.state = DecodeState::Body {
                                command,
                                remaining: payload_len + CRLF.len(),
                            };
                        }
                    }
                }
                DecodeState::Body { command, remaining } => {
                    if self.buffer.len() > remaining {
                        return Err(ProtocolError::ExcessBodyBytes {
                            expected: remaining,
                            actual: self.buffer.len(),
                        });
                    }
                    if self.buffer.len() < remaining {
                        break;
                    }

                    let mut body = self.buffer.split_to(remaining);
                    if &body[remaining - CRLF.len()..] != CRLF {
                        return Err(ProtocolError::MissingBodyTerminator);
                    }
                    body.truncate(remaining - CRLF.len());

                    self.requests_decoded += 1;
                    requests.push(dispatch_body(command, &body.freeze())?);
                    self.state = DecodeState::Line;
                }
            }
        }

        Ok(requests)
    }

    /// Total requests decoded over the decoder's lifetime.
    #[must_use]
    pub const fn requests_decoded(&self) -> u64 {
        self.requests_decoded
    }

    /// Total bytes fed over the decoder's lifetime.
    #[must_use]
    pub const fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_line(line: &[u8]) -> ProtocolResult<LineOutcome> {
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::UnknownCommand {
        line: String::from_utf8_lossy(line).into_owned(),
    })?;

    // A trailing space after `get messages` is accepted for client
    // compatibility.
    if text == "quit" {
        return Ok(LineOutcome::Request(Request::Quit));
    }
    if text == "get messages" || text == "get messages " {
        return Ok(LineOutcome::Request(Request::FetchMessages));
    }
    if text.starts_with("set ") {
        return parse_store_line(text);
    }

    Err(ProtocolError::UnknownCommand { line: text.to_string() })
}

/// Parse `set <command> <flags> <exptime> <bytes>`.
///
/// The two numeric middle fields are validated but semantically ignored;
/// they exist for wire compatibility with cache clients.
fn parse_store_line(text: &str) -> ProtocolResult<LineOutcome> {
    let malformed = || ProtocolError::MalformedStoreLine { line: text.to_string() };

    let tokens: Vec<&str> = text.split(' ').collect();
    let [_set, command, flags, exptime, bytes] = tokens[..] else {
        return Err(malformed());
    };

    let command = StoreCommand::parse(command).ok_or_else(|| {
        ProtocolError::UnknownStoreCommand { command: command.to_string() }
    })?;

    flags.parse::<u32>().map_err(|_| malformed())?;
    exptime.parse::<u32>().map_err(|_| malformed())?;
    let payload_len: usize = bytes.parse().map_err(|_| malformed())?;

    if payload_len > MAX_BODY_SIZE {
        return Err(ProtocolError::BodyTooLarge { actual: payload_len, max: MAX_BODY_SIZE });
    }

    Ok(LineOutcome::Body { command, payload_len })
}

fn dispatch_body(command: StoreCommand, payload: &Bytes) -> ProtocolResult<Request> {
    match command {
        StoreCommand::Subscribe => Ok(Request::Subscribe(parse_topic_list(payload)?)),
        StoreCommand::Unsubscribe => Ok(Request::Unsubscribe(parse_topic_list(payload)?)),
        StoreCommand::Publish => Ok(Request::Publish(entry::parse_block(payload)?)),
    }
}

/// Split a subscribe/unsubscribe payload on single ASCII spaces.
///
/// Empty tokens (from leading, trailing, or doubled spaces) are skipped;
/// an entirely empty payload yields an empty list, which the handlers
/// treat as a no-op.
fn parse_topic_list(payload: &Bytes) -> ProtocolResult<Vec<Topic>> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ProtocolError::malformed_entry("topic list is not valid UTF-8"))?;

    text.split(' ')
        .filter(|token| !token.is_empty())
        .map(|token| {
            Topic::new(token)
                .map_err(|_| ProtocolError::malformed_entry(format!("invalid topic: {token:?}")))
        })
        .collect()
}

/// One server response, encoded on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Store command accepted.
    Stored,
    /// Empty mailbox on fetch.
    End,
    /// Protocol-fatal framing or command violation.
    Error,
    /// Server-side refusal with explanatory text.
    ServerError(String),
    /// Malformed client payload (reserved; not currently produced).
    ClientError(String),
    /// Non-empty fetch result carrying a pre-encoded messages-block.
    Values(Bytes),
}

impl Response {
    /// Build the fetch response for drained mailbox entries: `End` when
    /// empty, otherwise `Values` with the serialized block.
    #[must_use]
    pub fn messages(entries: &[Delivery]) -> Self {
        if entries.is_empty() {
            Self::End
        } else {
            Self::Values(entry::encode_block(entries))
        }
    }

    /// The admission-refusal response.
    #[must_use]
    pub fn server_busy() -> Self {
        Self::ServerError("Too many clients".to_string())
    }

    /// Encode this response to wire bytes.
    ///
    /// A `Values` response advertises the block length excluding the
    /// block's own final CRLF separator:
    /// `VALUE messages 0 <N>\r\n<block>\r\nEND\r\n`.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Stored => Bytes::from_static(b"STORED\r\n"),
            Self::End => Bytes::from_static(b"END\r\n"),
            Self::Error => Bytes::from_static(b"ERROR\r\n"),
            Self::ServerError(text) => Bytes::from(format!("SERVER_ERROR {text}\r\n")),
            Self::ClientError(text) => Bytes::from(format!("CLIENT_ERROR {text}\r\n")),
            Self::Values(block) => {
                let header = format!("VALUE messages 0 {}\r\n", block.len());
                let mut buf =
                    BytesMut::with_capacity(header.len() + block.len() + CRLF.len() + 5);
                buf.put_slice(header.as_bytes());
                buf.put_slice(block);
                buf.put_slice(CRLF);
                buf.put_slice(b"END\r\n");
                buf.freeze()
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str) -> Topic {
        Topic::new(name).unwrap()
    }

    #[test]
    fn test_decode_quit() {
        let mut decoder = RequestDecoder::new();
        let requests = decoder.feed(b"quit\r\n").unwrap();
        assert_eq!(requests, vec![Request::Quit]);
    }

    #[test]
    fn test_decode_fetch_with_and_without_trailing_space() {
        let mut decoder = RequestDecoder::new();
        assert_eq!(decoder.feed(b"get messages\r\n").unwrap(), vec![Request::FetchMessages]);
        assert_eq!(decoder.feed(b"get messages \r\n").unwrap(), vec![Request::FetchMessages]);
    }

    #[test]
    fn test_decode_subscribe() {
        let mut decoder = RequestDecoder::new();
        assert!(decoder.feed(b"set subscribe 0 0 3\r\n").unwrap().is_empty());
        let requests = decoder.feed(b"a b\r\n").unwrap();
        assert_eq!(requests, vec![Request::Subscribe(vec![topic("a"), topic("b")])]);
    }

    #[test]
    fn test_decode_subscribe_empty_payload_is_empty_topic_list() {
        let mut decoder = RequestDecoder::new();
        let requests = decoder.feed(b"set subscribe 0 0 0\r\n\r\n").unwrap();
        assert_eq!(requests, vec![Request::Subscribe(vec![])]);
    }

    #[test]
    fn test_decode_publish_block() {
        let mut decoder = RequestDecoder::new();
        let requests = decoder.feed(b"set publish 0 0 17\r\nMESSAGE a 2\r\nm1\r\n\r\n").unwrap();
        let Request::Publish(entries) = &requests[0] else {
            panic!("expected publish request");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload.as_ref(), b"m1");
    }

    #[test]
    fn test_decode_publish_empty_block() {
        let mut decoder = RequestDecoder::new();
        let requests = decoder.feed(b"set publish 0 0 0\r\n\r\n").unwrap();
        assert_eq!(requests, vec![Request::Publish(vec![])]);
    }

    #[test]
    fn test_decode_byte_at_a_time() {
        let mut decoder = RequestDecoder::new();
        let wire = b"set subscribe 0 0 1\r\na\r\n";
        let mut requests = Vec::new();
        for byte in wire {
            requests.extend(decoder.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(requests, vec![Request::Subscribe(vec![topic("a")])]);
    }

    #[test]
    fn test_decode_binary_payload_with_crlf() {
        let mut decoder = RequestDecoder::new();
        // A publish whose 7-byte payload embeds CRLF, LF, and NUL.
        let mut wire = Vec::new();
        wire.extend_from_slice(b"set publish 0 0 22\r\n");
        wire.extend_from_slice(b"MESSAGE t 7\r\na\r\nb\nc\0\r\n\r\n");
        let requests = decoder.feed(&wire).unwrap();
        let Request::Publish(entries) = &requests[0] else {
            panic!("expected publish request");
        };
        assert_eq!(entries[0].payload.as_ref(), b"a\r\nb\nc\0");
    }

    #[test]
    fn test_unknown_command_is_fatal() {
        let mut decoder = RequestDecoder::new();
        assert!(matches!(
            decoder.feed(b"delete messages\r\n"),
            Err(ProtocolError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn test_unknown_store_command_is_fatal() {
        let mut decoder = RequestDecoder::new();
        assert!(matches!(
            decoder.feed(b"set broadcast 0 0 3\r\n"),
            Err(ProtocolError::UnknownStoreCommand { .. })
        ));
    }

    #[test]
    fn test_malformed_store_line_is_fatal() {
        let mut decoder = RequestDecoder::new();
        assert!(matches!(
            decoder.feed(b"set subscribe 0 0\r\n"),
            Err(ProtocolError::MalformedStoreLine { .. })
        ));
        let mut decoder = RequestDecoder::new();
        assert!(matches!(
            decoder.feed(b"set subscribe 0 0 abc\r\n"),
            Err(ProtocolError::MalformedStoreLine { .. })
        ));
    }

    #[test]
    fn test_excess_body_bytes_is_fatal() {
        let mut decoder = RequestDecoder::new();
        assert!(decoder.feed(b"set subscribe 0 0 1\r\n").unwrap().is_empty());
        assert!(matches!(
            decoder.feed(b"a\r\nget messages\r\n"),
            Err(ProtocolError::ExcessBodyBytes { .. })
        ));
    }

    #[test]
    fn test_body_must_end_with_crlf() {
        let mut decoder = RequestDecoder::new();
        assert!(matches!(
            decoder.feed(b"set subscribe 0 0 1\r\naXY"),
            Err(ProtocolError::MissingBodyTerminator)
        ));
    }

    #[test]
    fn test_oversized_line_is_fatal() {
        let mut decoder = RequestDecoder::new();
        let long = vec![b'x'; MAX_LINE_LENGTH + 1];
        assert!(matches!(decoder.feed(&long), Err(ProtocolError::LineTooLong { .. })));
    }

    #[test]
    fn test_oversized_body_announcement_is_fatal() {
        let mut decoder = RequestDecoder::new();
        let line = format!("set publish 0 0 {}\r\n", MAX_BODY_SIZE + 1);
        assert!(matches!(
            decoder.feed(line.as_bytes()),
            Err(ProtocolError::BodyTooLarge { .. })
        ));
    }

    #[test]
    fn test_pipelined_lines_decode_in_order() {
        let mut decoder = RequestDecoder::new();
        let requests = decoder.feed(b"get messages\r\nquit\r\n").unwrap();
        assert_eq!(requests, vec![Request::FetchMessages, Request::Quit]);
    }

    #[test]
    fn test_decoder_stats() {
        let mut decoder = RequestDecoder::new();
        decoder.feed(b"get messages\r\n").unwrap();
        assert_eq!(decoder.requests_decoded(), 1);
        assert_eq!(decoder.bytes_consumed(), 14);
    }

    #[test]
    fn test_encode_simple_responses() {
        assert_eq!(Response::Stored.encode().as_ref(), b"STORED\r\n");
        assert_eq!(Response::End.encode().as_ref(), b"END\r\n");
        assert_eq!(Response::Error.encode().as_ref(), b"ERROR\r\n");
        assert_eq!(
            Response::server_busy().encode().as_ref(),
            b"SERVER_ERROR Too many clients\r\n"
        );
    }

    #[test]
    fn test_fetch_response_advertises_block_length() {
        let entries = vec![Delivery::new(vec![topic("a")], Bytes::from_static(b"m1"))];
        let encoded = Response::messages(&entries).encode();
        assert_eq!(encoded.as_ref(), b"VALUE messages 0 17\r\nMESSAGE a 2\r\nm1\r\n\r\nEND\r\n");
    }

    #[test]
    fn test_fetch_response_empty_is_end() {
        assert_eq!(Response::messages(&[]).encode().as_ref(), b"END\r\n");
    }
}
