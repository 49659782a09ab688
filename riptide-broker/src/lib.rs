//! # Riptide Broker
//!
//! A lightweight topic-based publish/subscribe broker over TCP.
//!
//! Clients subscribe to arbitrary sets of topic names, publish messages
//! to topics, and drain the messages delivered to them with an explicit
//! fetch. Delivery is pull-based: messages accumulate in a per-client
//! mailbox until the client fetches them. The wire protocol mimics a
//! line+body cache protocol so off-the-shelf cache clients work.
//!
//! This crate provides:
//! - A sharded topic→subscriber router with no global lock
//! - Per-client mailboxes with lifecycle tied to the owning connection
//! - The framed TCP front end with bounded admission
//! - Broker lifecycle, configuration, and pidfile handling
//!
//! ## Examples
//!
//! ```rust,no_run
//! use riptide_broker::{Broker, BrokerConfig};
//!
//! # async fn example() -> riptide_core::Result<()> {
//! let mut broker = Broker::new(BrokerConfig::default())?;
//! let addr = broker.start().await?;
//! println!("listening on {addr}");
//! broker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod broker;
pub mod config;
pub mod mailbox;
pub mod network;
pub mod pidfile;
pub mod routing;

pub use broker::{Broker, BrokerStats, StatsSnapshot};
pub use config::{BrokerConfig, NetworkConfig, RouterConfig};
pub use mailbox::{Mailbox, MailboxId};
pub use pidfile::PidFile;
pub use routing::Router;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::{Broker, BrokerConfig, Mailbox, MailboxId, Router};
    pub use riptide_core::prelude::*;
}
