//! Async TCP listener with bounded admission and graceful shutdown.

use crate::broker::BrokerStats;
use crate::config::NetworkConfig;
use crate::mailbox::Mailbox;
use crate::network::connection::{Connection, ConnectionTeardown};
use crate::network::ConnectionRegistry;
use crate::routing::Router;
use riptide_core::protocol::Response;
use riptide_core::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Async TCP listener for client connections.
#[derive(Debug)]
pub struct TcpListener {
    listener: TokioTcpListener,
    config: NetworkConfig,
    router: Arc<Router>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<BrokerStats>,
    shutdown_tx: broadcast::Sender<()>,
    // Subscribed at bind time so a shutdown sent before the accept loop
    // first polls is not missed.
    shutdown_rx: broadcast::Receiver<()>,
}

impl TcpListener {
    /// Bind the configured address.
    ///
    /// # Errors
    /// Returns an error if the listen address is invalid or the socket
    /// cannot bind.
    pub async fn bind(
        config: NetworkConfig,
        router: Arc<Router>,
        registry: Arc<ConnectionRegistry>,
        stats: Arc<BrokerStats>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<Self> {
        let addr = config.bind_address()?;
        let listener = TokioTcpListener::bind(addr).await?;
        info!(
            addr = %listener.local_addr()?,
            max_clients = config.max_tcp_clients,
            "TCP listener started"
        );
        let shutdown_rx = shutdown_tx.subscribe();
        Ok(Self { listener, config, router, registry, stats, shutdown_tx, shutdown_rx })
    }

    /// The actual bound address (relevant when the configured port is 0).
    ///
    /// # Errors
    /// Returns an error if the socket's local address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the shutdown signal fires.
    ///
    /// # Errors
    /// Never returns an error today; accept failures are logged and
    /// retried after a brief pause.
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.handle_accept(stream, addr),
                    Err(e) => {
                        error!(error = %e, "error accepting connection");
                        // Brief pause to avoid a tight error loop.
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = self.shutdown_rx.recv() => {
                    info!("received shutdown signal, stopping listener");
                    break;
                }
            }
        }

        info!("TCP listener stopped");
        Ok(())
    }

    /// Admit or refuse one accepted socket.
    fn handle_accept(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = configure_socket(&stream) {
            warn!(%addr, error = %e, "failed to configure socket");
        }

        let mailbox = Arc::new(Mailbox::new());
        if !self.registry.try_add(Arc::clone(&mailbox)) {
            warn!(
                %addr,
                max_clients = self.config.max_tcp_clients,
                "rejecting connection, at maximum capacity"
            );
            tokio::spawn(refuse_busy(stream));
            return;
        }

        self.stats.record_accepted();
        let connection = Connection::new(stream, addr, Arc::clone(&mailbox));
        info!(
            client = %connection.client_name(),
            %addr,
            total = self.registry.connection_count(),
            "connection accepted"
        );

        let teardown = ConnectionTeardown::new(
            mailbox,
            Arc::clone(&self.router),
            Arc::clone(&self.registry),
        );
        let router = Arc::clone(&self.router);
        let stats = Arc::clone(&self.stats);
        let idle_timeout = self.config.idle_timeout();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            // Held across the whole task: its Drop is the teardown
            // compensation and runs even if `run` panics.
            let _teardown = teardown;
            let _ = connection.run(router, stats, idle_timeout, shutdown_rx).await;
        });
    }
}

/// Send the admission refusal and close.
async fn refuse_busy(mut stream: TcpStream) {
    let _ = stream.write_all(&Response::server_busy().encode()).await;
    let _ = stream.shutdown().await;
}

/// Apply low-latency socket options to an accepted stream.
fn configure_socket(stream: &TcpStream) -> std::io::Result<()> {
    use socket2::{SockRef, TcpKeepalive};

    let socket = SockRef::from(stream);
    socket.set_nodelay(true)?;

    let keepalive =
        TcpKeepalive::new().with_time(Duration::from_secs(60)).with_interval(Duration::from_secs(10));
    socket.set_tcp_keepalive(&keepalive)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;

    fn test_network_config() -> NetworkConfig {
        NetworkConfig {
            listen_ip: "127.0.0.1".to_string(),
            tcp_server_port: 0,
            max_tcp_clients: 10,
            idle_timeout_secs: 5,
        }
    }

    async fn bind_test_listener() -> TcpListener {
        let (shutdown_tx, _) = broadcast::channel(1);
        TcpListener::bind(
            test_network_config(),
            Arc::new(Router::new(&RouterConfig::default())),
            Arc::new(ConnectionRegistry::new(10)),
            Arc::new(BrokerStats::new()),
            shutdown_tx,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_bind_assigns_ephemeral_port() {
        let listener = bind_test_listener().await;
        let addr = listener.local_addr().unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_invalid_address_fails() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = NetworkConfig {
            listen_ip: "not-an-ip".to_string(),
            ..test_network_config()
        };
        let result = TcpListener::bind(
            config,
            Arc::new(Router::new(&RouterConfig::default())),
            Arc::new(ConnectionRegistry::new(10)),
            Arc::new(BrokerStats::new()),
            shutdown_tx,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let listener = bind_test_listener().await;
        let shutdown_tx = listener.shutdown_tx.clone();

        let task = tokio::spawn(listener.run());
        shutdown_tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }
}
