//! Line+body wire protocol for the riptide broker.
//!
//! The protocol mimics a memcached-style cache protocol so off-the-shelf
//! clients can reach the broker:
//!
//! ```text
//! set subscribe 0 0 <bytes>\r\n<T1> <T2> ... <Tn>\r\n     -> STORED\r\n
//! set unsubscribe 0 0 <bytes>\r\n<T1> <T2> ... <Tn>\r\n   -> STORED\r\n
//! set publish 0 0 <bytes>\r\n<publish-block>\r\n          -> STORED\r\n
//! get messages\r\n                                        -> VALUE ... END\r\n or END\r\n
//! quit\r\n                                                -> (connection closed)
//! ```
//!
//! A `<publish-block>` is a concatenation of zero or more entries:
//!
//! ```text
//! MESSAGE <topic1> ... <topicK> <payload_bytes>\r\n<payload>\r\n
//! ```
//!
//! All byte counts are ASCII decimals and exclude the terminating CRLF of
//! the framed body. Payloads are 8-bit clean (they may contain CRLF); the
//! decoder is therefore driven by byte counts, never by line scanning,
//! once a body is announced.

pub mod codec;
pub mod entry;
pub mod error;

pub use codec::{Request, RequestDecoder, Response, StoreCommand};
pub use entry::{encode_block, encoded_block_len, parse_block};
pub use error::{ProtocolError, ProtocolResult};

/// Protocol constants shared by the decoder and encoders.
pub mod constants {
    /// Maximum accepted command-line length in bytes.
    pub const MAX_LINE_LENGTH: usize = 1024;

    /// Maximum accepted framed-body payload size in bytes (16MB).
    pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

    /// Keyword opening every publish-block entry.
    pub const ENTRY_KEYWORD: &str = "MESSAGE";
}
