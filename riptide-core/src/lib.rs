//! # Riptide Core
//!
//! Core library for the riptide topic-based publish/subscribe broker.
//!
//! This crate provides the protocol-independent building blocks:
//! - Message and topic definitions
//! - The line+body wire protocol (decoder, responses, block grammar)
//! - Core error types
//!
//! The broker itself (routing, mailboxes, networking) lives in the
//! `riptide-broker` crate.
//!
//! ## Examples
//!
//! ```rust
//! use riptide_core::{Delivery, Topic};
//! use bytes::Bytes;
//!
//! # fn example() -> riptide_core::Result<()> {
//! let topic = Topic::new("alerts")?;
//! let delivery = Delivery::new(vec![topic], Bytes::from_static(b"disk full"));
//! assert_eq!(delivery.payload_size(), 9);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod message;
pub mod protocol;

pub use error::{Error, Result};
pub use message::{Delivery, Topic};

/// Re-export commonly used types for convenience.
pub mod prelude {
    pub use crate::protocol::{ProtocolError, Request, RequestDecoder, Response};
    pub use crate::{Delivery, Error, Result, Topic};
    pub use bytes::Bytes;
}
