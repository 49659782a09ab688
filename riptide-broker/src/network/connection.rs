//! Per-connection protocol driver.
//!
//! Each connection exclusively owns one mailbox and one request decoder.
//! The driver reads socket chunks, feeds the decoder, maps requests onto
//! router and mailbox operations, and writes responses. Writes never run
//! under a shard lock. Every exit path (clean quit, protocol error,
//! idle timeout, peer reset, even a panic in the handling task) runs
//! the mailbox-teardown compensation via [`ConnectionTeardown`].

use crate::broker::BrokerStats;
use crate::mailbox::{Mailbox, MailboxId};
use crate::network::ConnectionRegistry;
use crate::routing::Router;
use bytes::BytesMut;
use riptide_core::protocol::{Request, RequestDecoder, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Client identifier used in logs and diagnostics, derived from the
/// connection's mailbox identity.
#[must_use]
pub fn client_name(id: MailboxId) -> String {
    format!("client-{id}")
}

/// A live client connection.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    remote_addr: SocketAddr,
    mailbox: Arc<Mailbox>,
    decoder: RequestDecoder,
    client_name: String,
}

impl Connection {
    /// Wrap an accepted stream with its freshly admitted mailbox.
    #[must_use]
    pub fn new(stream: TcpStream, remote_addr: SocketAddr, mailbox: Arc<Mailbox>) -> Self {
        let client_name = client_name(mailbox.id());
        Self { stream, remote_addr, mailbox, decoder: RequestDecoder::new(), client_name }
    }

    /// The connection's mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// The client identifier for this connection.
    #[must_use]
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// The peer address.
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Drive the connection until it quits, fails, times out, or the
    /// server shuts down.
    ///
    /// # Errors
    /// Never returns an error today; failures are contained and logged,
    /// and the `Result` keeps the task signature uniform with the rest
    /// of the broker.
    pub async fn run(
        mut self,
        router: Arc<Router>,
        stats: Arc<BrokerStats>,
        idle_timeout: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> riptide_core::Result<()> {
        let mut read_buf = BytesMut::with_capacity(8192);

        'conn: loop {
            let read = tokio::select! {
                _ = shutdown.recv() => {
                    debug!(client = %self.client_name, "closing connection for shutdown");
                    break 'conn;
                }
                read = timeout(idle_timeout, self.stream.read_buf(&mut read_buf)) => read,
            };

            match read {
                Err(_elapsed) => {
                    error!(client = %self.client_name, "idle timeout, closing connection");
                    break 'conn;
                }
                Ok(Ok(0)) => {
                    debug!(client = %self.client_name, "peer closed connection");
                    break 'conn;
                }
                Ok(Err(e)) => {
                    debug!(client = %self.client_name, error = %e, "read failed");
                    break 'conn;
                }
                Ok(Ok(_)) => {}
            }

            let requests = self.decoder.feed(&read_buf);
            read_buf.clear();

            let requests = match requests {
                Ok(requests) => requests,
                Err(e) => {
                    warn!(client = %self.client_name, error = %e, "protocol error");
                    let _ = self.stream.write_all(&Response::Error.encode()).await;
                    break 'conn;
                }
            };

            for request in requests {
                let Some(response) = self.handle(&router, &stats, request) else {
                    debug!(client = %self.client_name, "quit");
                    break 'conn;
                };
                if let Err(e) = self.stream.write_all(&response.encode()).await {
                    debug!(client = %self.client_name, error = %e, "write failed");
                    break 'conn;
                }
            }
        }

        debug!(
            client = %self.client_name,
            requests = self.decoder.requests_decoded(),
            bytes = self.decoder.bytes_consumed(),
            "connection finished"
        );
        Ok(())
    }

    /// Map one request onto router and mailbox operations. `None` means
    /// the connection should close (quit).
    fn handle(
        &mut self,
        router: &Router,
        stats: &BrokerStats,
        request: Request,
    ) -> Option<Response> {
        match request {
            Request::Quit => None,
            Request::FetchMessages => {
                let entries = self.mailbox.drain();
                Some(Response::messages(&entries))
            }
            Request::Subscribe(topics) => {
                router.subscribe(&self.mailbox, &topics);
                Some(Response::Stored)
            }
            Request::Unsubscribe(topics) => {
                router.unsubscribe(&self.mailbox, &topics);
                Some(Response::Stored)
            }
            Request::Publish(entries) => {
                for entry in &entries {
                    let delivered =
                        router.publish(self.mailbox.id(), &entry.topics, &entry.payload);
                    stats.record_published(1);
                    stats.record_delivered(delivered as u64);
                }
                Some(Response::Stored)
            }
        }
    }
}

/// RAII teardown compensation for one connection.
///
/// Held by the connection's task alongside [`Connection::run`]; its
/// `Drop` runs on every exit path, including a panic unwinding through
/// the task. Order matters: the mailbox is stopped first so late shard
/// publishes hit a dead mailbox, then every shard reference is evicted,
/// then the connection leaves the registry, freeing its admission slot.
#[derive(Debug)]
pub struct ConnectionTeardown {
    mailbox: Arc<Mailbox>,
    router: Arc<Router>,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionTeardown {
    /// Arm the teardown for a connection's mailbox.
    #[must_use]
    pub fn new(
        mailbox: Arc<Mailbox>,
        router: Arc<Router>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self { mailbox, router, registry }
    }
}

impl Drop for ConnectionTeardown {
    fn drop(&mut self) {
        let id = self.mailbox.id();
        self.mailbox.stop();
        self.router.drop_queue(id);
        self.registry.remove(id);
        debug!(client = %client_name(id), "connection torn down");
    }
}
