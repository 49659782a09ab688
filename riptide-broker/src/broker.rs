//! Broker lifecycle and statistics.
//!
//! [`Broker`] wires the router, connection registry, and TCP listener
//! together behind a start/shutdown pair. Shutdown is cooperative: the
//! broadcast signal stops the accept loop and every connection task,
//! each of which runs its own teardown compensation.

use crate::config::BrokerConfig;
use crate::network::{ConnectionRegistry, TcpListener};
use crate::routing::Router;
use riptide_core::{Error, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Monotonic broker counters, updated from connection tasks.
#[derive(Debug, Default)]
pub struct BrokerStats {
    connections_accepted: AtomicU64,
    messages_published: AtomicU64,
    messages_delivered: AtomicU64,
}

impl BrokerStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one admitted connection.
    pub fn record_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record published entries.
    pub fn record_published(&self, count: u64) {
        self.messages_published.fetch_add(count, Ordering::Relaxed);
    }

    /// Record mailbox enqueues produced by publishes.
    pub fn record_delivered(&self, count: u64) {
        self.messages_delivered.fetch_add(count, Ordering::Relaxed);
    }
}

/// Point-in-time view of broker state.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// Connections ever admitted.
    pub connections_accepted: u64,
    /// Publish entries processed.
    pub messages_published: u64,
    /// Mailbox enqueues produced by publishes.
    pub messages_delivered: u64,
    /// Currently live connections.
    pub live_connections: usize,
    /// Topics currently holding at least one subscriber.
    pub topics_with_subscribers: usize,
}

/// The riptide pub/sub broker.
#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    router: Arc<Router>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<BrokerStats>,
    shutdown_tx: broadcast::Sender<()>,
    server_task: Option<JoinHandle<Result<()>>>,
    local_addr: Option<SocketAddr>,
}

impl Broker {
    /// Create a broker from a validated configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: BrokerConfig) -> Result<Self> {
        config.validate()?;

        let router = Arc::new(Router::new(&config.router));
        let registry = Arc::new(ConnectionRegistry::new(config.network.max_tcp_clients));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            router,
            registry,
            stats: Arc::new(BrokerStats::new()),
            shutdown_tx,
            server_task: None,
            local_addr: None,
        })
    }

    /// Bind the listener and start accepting connections. Returns the
    /// actual bound address.
    ///
    /// # Errors
    /// Returns an error if the broker is already running or the listener
    /// cannot bind.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.is_running() {
            return Err(Error::internal("broker is already running"));
        }

        let listener = TcpListener::bind(
            self.config.network.clone(),
            Arc::clone(&self.router),
            Arc::clone(&self.registry),
            Arc::clone(&self.stats),
            self.shutdown_tx.clone(),
        )
        .await?;

        let addr = listener.local_addr()?;
        self.local_addr = Some(addr);
        self.server_task = Some(tokio::spawn(listener.run()));

        info!(
            %addr,
            shards = self.router.num_shards(),
            max_clients = self.config.network.max_tcp_clients,
            "broker started"
        );
        Ok(addr)
    }

    /// Whether the accept loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.server_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// The bound address, once started.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop accepting, signal every connection to close, and wait for
    /// the accept loop to finish.
    ///
    /// # Errors
    /// Never returns an error today; kept fallible for lifecycle
    /// symmetry with [`Broker::start`].
    pub async fn shutdown(&mut self) -> Result<()> {
        // No receivers just means nothing was running.
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.server_task.take() {
            let _ = task.await;
        }
        info!("broker stopped");
        Ok(())
    }

    /// The broker's router.
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The broker's configuration.
    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Snapshot the broker counters and registry state.
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.stats.connections_accepted.load(Ordering::Relaxed),
            messages_published: self.stats.messages_published.load(Ordering::Relaxed),
            messages_delivered: self.stats.messages_delivered.load(Ordering::Relaxed),
            live_connections: self.registry.connection_count(),
            topics_with_subscribers: self.router.topic_count(),
        }
    }
}
