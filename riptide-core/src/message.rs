//! Message and topic types for the pub/sub broker.

use bytes::Bytes;
use std::fmt;

/// Topic name used as a routing key.
///
/// A topic is an opaque non-empty byte string. Spaces and CR/LF are
/// rejected because the wire protocol separates topic tokens with single
/// spaces and terminates lines with CRLF. Identity is byte equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    /// Create a new topic.
    ///
    /// # Errors
    /// Returns an error if the name is empty or contains a space, CR, or LF.
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidMessage {
                message: "Topic name cannot be empty".to_string(),
            });
        }

        if name.bytes().any(|b| b == b' ' || b == b'\r' || b == b'\n') {
            return Err(crate::Error::InvalidMessage {
                message: format!("Topic name contains forbidden byte: {name:?}"),
            });
        }

        Ok(Self(name))
    }

    /// Get the topic name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the topic name bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Convert to an owned string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single delivered entry: an opaque payload plus the topic names that
/// caused its delivery.
///
/// Immutable after creation. The payload is 8-bit clean (it may contain
/// CRLF or NUL bytes) because the wire protocol frames it by explicit
/// length. The topic list carries the topics the receiving mailbox
/// matched in the shard that enqueued the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topics that matched this delivery (at least one).
    pub topics: Vec<Topic>,

    /// Message payload (zero-copy).
    pub payload: Bytes,
}

impl Delivery {
    /// Create a new delivery.
    #[must_use]
    pub fn new(topics: Vec<Topic>, payload: Bytes) -> Self {
        Self { topics, payload }
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_accepts_opaque_names() {
        assert!(Topic::new("alerts").is_ok());
        assert!(Topic::new("a.b-c_d/e").is_ok());
        assert!(Topic::new("\u{00e9}clair").is_ok());
    }

    #[test]
    fn test_topic_rejects_empty() {
        assert!(Topic::new("").is_err());
    }

    #[test]
    fn test_topic_rejects_space_and_crlf() {
        assert!(Topic::new("two words").is_err());
        assert!(Topic::new("line\r").is_err());
        assert!(Topic::new("line\n").is_err());
    }

    #[test]
    fn test_topic_identity_is_byte_equality() {
        let a = Topic::new("t").unwrap();
        let b = Topic::new("t").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Topic::new("T").unwrap());
    }

    #[test]
    fn test_delivery_payload_size() {
        let d = Delivery::new(
            vec![Topic::new("t").unwrap()],
            Bytes::from_static(b"a\r\nb\nc\0"),
        );
        assert_eq!(d.payload_size(), 7);
    }
}
