// ============================================
// File: crates/veiltun-server/src/server.rs
// ============================================
//! # Server Orchestrator
//!
//! ## Creation Reason
//! Main server implementation that coordinates all components and
//! manages the server lifecycle.
//!
//! ## Main Functionality
//! - `TunnelServer`: component wiring, start/stop, introspection
//! - Accept task: capacity gate, one task per control stream
//! - Datagram task: decrypt and hand off tunnel payload
//! - Cleanup task: idle expiry
//!
//! ## Server Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TunnelServer                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────┐        │
//! │  │ Accept     │  │ Datagram     │  │ Cleanup      │        │
//! │  │ Task (TCP) │  │ Task (UDP)   │  │ Task         │        │
//! │  └─────┬──────┘  └──────┬───────┘  └──────┬───────┘        │
//! │        │ spawn          │                 │                 │
//! │        ▼                ▼                 ▼                 │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────┐        │
//! │  │ Connection │  │ Datagram     │  │ expire_idle  │        │
//! │  │ Task       │  │ Handler      │  │              │        │
//! │  │ handshake  │  │ → PayloadSink│  │              │        │
//! │  │ → control  │  │              │  │              │        │
//! │  └─────┬──────┘  └──────┬───────┘  └──────┬───────┘        │
//! │        └────────────────┼─────────────────┘                 │
//! │                         ▼                                   │
//! │               ┌───────────────────┐                         │
//! │               │ConnectionRegistry │                         │
//! │               └───────────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Shutdown is a broadcast plus an `AtomicBool`; every loop selects on
//!   the broadcast, the flag catches work that slipped past it
//! - Connection tasks live in a `JoinSet` owned by the accept task, so
//!   awaiting the accept task also drains them
//! - A full registry drops the stream before reading a byte
//!
//! ## Last Modified
//! v0.1.0 - Initial server implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use veiltun_common::ClientId;
use veiltun_core::CryptoEngine;
use veiltun_transport::{
    DatagramTransport, FrameReader, StreamListener, TransportError, UdpTransport,
};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::events::ConnectionEvent;
use crate::handlers::control::run_control_loop;
use crate::handlers::{DatagramHandler, PayloadSink};
use crate::services::{
    ConnectionInfo, ConnectionRegistry, HandshakeService, IdentityResolver, IpPoolService,
};
use crate::stats::{ServerStats, ServerStatsSnapshot};

/// Bound on waiting for each task during `stop()`.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Pause after a failed accept, so descriptor exhaustion doesn't spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

// ============================================
// ServerHandle
// ============================================

/// Addresses the server actually bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHandle {
    /// Control channel (TCP).
    pub stream_addr: SocketAddr,
    /// Datagram channel (UDP).
    pub datagram_addr: SocketAddr,
}

struct Running {
    handle: ServerHandle,
    udp: Arc<UdpTransport>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// State shared by connection tasks.
struct ConnectionContext {
    handshake: HandshakeService,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ServerStats>,
    shutdown: Arc<AtomicBool>,
}

// ============================================
// TunnelServer
// ============================================

/// The tunnel endpoint.
///
/// # Lifecycle
/// 1. Create with `TunnelServer::new(...)`
/// 2. `start().await` binds sockets and spawns tasks, then returns
/// 3. `stop().await` shuts everything down
pub struct TunnelServer {
    config: ServerConfig,
    crypto: Arc<CryptoEngine>,
    identity: Arc<dyn IdentityResolver>,
    ip_pool: Arc<IpPoolService>,
    registry: Arc<ConnectionRegistry>,
    datagrams: Arc<DatagramHandler>,
    stats: Arc<ServerStats>,
    shutdown: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    running: Mutex<Option<Running>>,
}

impl TunnelServer {
    /// Creates a server. Nothing is bound until [`start`](Self::start).
    ///
    /// # Errors
    /// `ConfigInvalid` if the configuration fails validation.
    pub fn new(
        config: ServerConfig,
        crypto: Arc<CryptoEngine>,
        identity: Arc<dyn IdentityResolver>,
        sink: Arc<dyn PayloadSink>,
    ) -> Result<Self> {
        config.validate()?;

        let ip_pool = Arc::new(config.tunnel.build_pool()?);
        let registry = Arc::new(ConnectionRegistry::new(config.limits.max_connections));
        let stats = Arc::new(ServerStats::default());
        let datagrams = Arc::new(DatagramHandler::new(
            Arc::clone(&registry),
            sink,
            Arc::clone(&stats),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            ip_pool_capacity = ip_pool.capacity(),
            max_connections = config.limits.max_connections,
            "Services initialized"
        );

        Ok(Self {
            config,
            crypto,
            identity,
            ip_pool,
            registry,
            datagrams,
            stats,
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            running: Mutex::new(None),
        })
    }

    /// Binds both sockets and spawns the server tasks.
    ///
    /// # Errors
    /// `StartupFailed` if already started or stopped, or if a socket
    /// cannot be bound.
    pub async fn start(&self) -> Result<ServerHandle> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(ServerError::startup_failed("server has been stopped"));
        }
        if self.running.lock().is_some() {
            return Err(ServerError::startup_failed("server already started"));
        }

        info!("Starting VeilTun server v{}", env!("CARGO_PKG_VERSION"));

        let listener = StreamListener::bind_addr(self.config.network.stream_addr)
            .await
            .map_err(|e| ServerError::startup_failed(format!("stream bind failed: {e}")))?;

        let udp = Arc::new(
            UdpTransport::bind_with(
                self.config.network.datagram_addr,
                self.config.network.datagram_options(),
            )
            .await
            .map_err(|e| ServerError::startup_failed(format!("datagram bind failed: {e}")))?,
        );

        let handle = ServerHandle {
            stream_addr: listener.local_addr(),
            datagram_addr: udp.local_addr()?,
        };

        let context = Arc::new(ConnectionContext {
            handshake: HandshakeService::new(
                Arc::clone(&self.crypto),
                Arc::clone(&self.identity),
                Arc::clone(&self.ip_pool),
                self.config.tunnel.clone(),
                self.config.handshake_timeout(),
            ),
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
            shutdown: Arc::clone(&self.shutdown),
        });

        let tasks = vec![
            ("accept", self.spawn_accept_task(listener, context)),
            ("datagram", self.spawn_datagram_task(Arc::clone(&udp))),
            ("cleanup", self.spawn_cleanup_task()),
        ];

        let mut running = self.running.lock();
        if running.is_some() {
            // Lost a race with a concurrent start().
            for (_, task) in &tasks {
                task.abort();
            }
            return Err(ServerError::startup_failed("server already started"));
        }
        *running = Some(Running { handle, udp, tasks });

        info!(
            stream_addr = %handle.stream_addr,
            datagram_addr = %handle.datagram_addr,
            "Server started successfully"
        );
        Ok(handle)
    }

    /// Stops the server: signals every task, waits up to 5 s for each,
    /// closes both sockets and removes every connection with `"shutdown"`.
    pub async fn stop(&self) {
        info!("Shutting down server...");
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let running = self.running.lock().take();

        if let Some(running) = running {
            if let Err(e) = running.udp.shutdown().await {
                warn!(error = %e, "Datagram socket shutdown error");
            }

            for (name, mut task) in running.tasks {
                match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
                    Ok(Ok(())) => debug!("Task '{}' completed", name),
                    Ok(Err(e)) => warn!("Task '{}' failed: {}", name, e),
                    Err(_) => {
                        warn!("Task '{}' timed out during shutdown", name);
                        task.abort();
                    }
                }
            }
        }

        let removed = self.registry.remove_all("shutdown");
        info!(removed, "Server shutdown complete");
    }

    /// Encrypts `payload` under `client_id`'s session key and sends it to
    /// the client's address.
    ///
    /// # Errors
    /// `ShuttingDown` if the server is not running, `ConnectionNotFound`
    /// if the client is not registered, `Transport` if the send fails.
    pub async fn send_datagram(&self, client_id: ClientId, payload: &[u8]) -> Result<usize> {
        let udp = self
            .running
            .lock()
            .as_ref()
            .map(|r| Arc::clone(&r.udp))
            .ok_or(ServerError::ShuttingDown)?;

        let blob = self.datagrams.seal_outbound(&client_id, payload)?;
        Ok(udp.send(&blob, &client_id).await?)
    }

    /// Bound control address, once started.
    #[must_use]
    pub fn stream_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.handle.stream_addr)
    }

    /// Bound datagram address, once started.
    #[must_use]
    pub fn datagram_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.handle.datagram_addr)
    }

    /// Snapshot of every established connection.
    #[must_use]
    pub fn active_connections(&self) -> Vec<ConnectionInfo> {
        self.registry.snapshot()
    }

    /// Registry occupancy, 0–100.
    #[must_use]
    pub fn load(&self) -> f64 {
        self.registry.load()
    }

    /// Server counters.
    #[must_use]
    pub fn stats(&self) -> ServerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Subscribes to connection lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.registry.subscribe()
    }

    /// Returns `true` between `start()` and `stop()`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    // ========================================
    // Tasks
    // ========================================

    /// Spawns the control-stream accept task.
    fn spawn_accept_task(
        &self,
        listener: StreamListener,
        context: Arc<ConnectionContext>,
    ) -> JoinHandle<()> {
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut connections = JoinSet::new();

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        debug!("Accept task received shutdown signal");
                        break;
                    }
                    Some(joined) = connections.join_next(), if !connections.is_empty() => {
                        if let Err(e) = joined {
                            if e.is_panic() {
                                error!(error = %e, "Connection task panicked");
                            }
                        }
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            if context.shutdown.load(Ordering::SeqCst) {
                                break;
                            }
                            if !context.registry.has_capacity() {
                                context.stats.record_rejected();
                                info!(client = %peer, "At capacity, dropping connection");
                                drop(stream);
                                continue;
                            }
                            context.stats.record_accepted();
                            debug!(client = %peer, "Control stream accepted");
                            connections.spawn(handle_connection(
                                Arc::clone(&context),
                                stream,
                                peer,
                                shutdown_tx.subscribe(),
                            ));
                        }
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    },
                }
            }

            // Listener closes here; connection tasks saw the same signal.
            drop(listener);
            while let Some(joined) = connections.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = %e, "Connection task panicked");
                    }
                }
            }

            debug!("Accept task exiting");
        })
    }

    /// Spawns the datagram receive task.
    fn spawn_datagram_task(&self, udp: Arc<UdpTransport>) -> JoinHandle<()> {
        let shutdown = Arc::clone(&self.shutdown);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handler = Arc::clone(&self.datagrams);

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        debug!("Datagram task received shutdown signal");
                        break;
                    }
                    result = udp.recv(&mut buf) => {
                        match result {
                            Ok((len, source)) => {
                                if shutdown.load(Ordering::SeqCst) {
                                    break;
                                }
                                handler.handle_inbound(source.addr, &buf[..len]);
                            }
                            Err(TransportError::ShuttingDown) => break,
                            // ICMP errors from earlier sends surface here on some
                            // platforms; they never stop the loop.
                            Err(e) if e.is_retryable() => {
                                debug!(error = %e, "Datagram receive error");
                            }
                            Err(e) => {
                                if !shutdown.load(Ordering::SeqCst) {
                                    warn!(error = %e, "Datagram receive failed");
                                }
                            }
                        }
                    }
                }
            }

            debug!("Datagram task exiting");
        })
    }

    /// Spawns the idle cleanup task.
    fn spawn_cleanup_task(&self) -> JoinHandle<()> {
        let shutdown = Arc::clone(&self.shutdown);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let registry = Arc::clone(&self.registry);
        let ip_pool = Arc::clone(&self.ip_pool);
        let interval = self.config.cleanup_interval();
        let idle_timeout = self.config.idle_timeout();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Cleanup task received shutdown signal");
                        break;
                    }
                    _ = interval_timer.tick() => {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }

                        let expired = registry.expire_idle(idle_timeout);

                        debug!(
                            expired = expired.len(),
                            connections = registry.len(),
                            ips_allocated = ip_pool.allocated_count(),
                            "Cleanup cycle complete"
                        );
                    }
                }
            }

            debug!("Cleanup task exiting");
        })
    }
}

impl std::fmt::Debug for TunnelServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelServer")
            .field("stream_addr", &self.config.network.stream_addr)
            .field("datagram_addr", &self.config.network.datagram_addr)
            .field("registry", &self.registry)
            .field("running", &self.is_running())
            .finish()
    }
}

// ============================================
// Connection task
// ============================================

/// Handshake, registration and control loop for one accepted stream.
async fn handle_connection(
    context: Arc<ConnectionContext>,
    stream: TcpStream,
    peer: ClientId,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    // A receiver subscribed after the signal never sees it; the flag is
    // set before the signal is sent.
    if context.shutdown.load(Ordering::SeqCst) {
        return;
    }

    let (read_half, mut writer) = stream.into_split();
    let mut reader = FrameReader::new(read_half);

    let mut session = context.handshake.session(peer);
    let outcome = match session.run(&mut reader, &mut writer, &mut shutdown_rx).await {
        Ok(outcome) => outcome,
        Err(_) => {
            // Already logged by the session.
            context.stats.record_handshake_failed();
            return;
        }
    };

    if context.shutdown.load(Ordering::SeqCst) {
        debug!(client = %peer, "Handshake finished during shutdown, not registering");
        return;
    }

    if let Err(e) = context.registry.register(peer, outcome.into_connection(peer)) {
        context.stats.record_handshake_failed();
        warn!(client = %peer, error = %e, "Registration refused, closing stream");
        return;
    }
    context.stats.record_handshake_completed();

    let exit = run_control_loop(
        peer,
        &mut reader,
        &mut writer,
        context.handshake.codec(),
        &context.registry,
        &mut shutdown_rx,
    )
    .await;
    debug!(client = %peer, ?exit, "Control loop finished");

    let _ = writer.shutdown().await;
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::LoggingSink;
    use crate::services::StaticIdentityResolver;

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.network.stream_addr = "127.0.0.1:0".parse().unwrap();
        config.network.datagram_addr = "127.0.0.1:0".parse().unwrap();
        config
    }

    fn server(config: ServerConfig) -> TunnelServer {
        TunnelServer::new(
            config,
            Arc::new(CryptoEngine::generate().unwrap()),
            Arc::new(StaticIdentityResolver::new([("t", "u")])),
            Arc::new(LoggingSink::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_binds_and_stop_clears() {
        let server = server(test_config());
        assert!(server.stream_addr().is_none());

        let handle = server.start().await.unwrap();
        assert_ne!(handle.stream_addr.port(), 0);
        assert_ne!(handle.datagram_addr.port(), 0);
        assert_eq!(server.stream_addr(), Some(handle.stream_addr));
        assert!(server.is_running());

        assert!(matches!(server.start().await, Err(ServerError::StartupFailed { .. })));

        server.stop().await;
        assert!(!server.is_running());
        assert!(server.datagram_addr().is_none());
        assert!(matches!(server.start().await, Err(ServerError::StartupFailed { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.limits.max_connections = 0;

        let result = TunnelServer::new(
            config,
            Arc::new(CryptoEngine::generate().unwrap()),
            Arc::new(StaticIdentityResolver::new([("t", "u")])),
            Arc::new(LoggingSink::new()),
        );
        assert!(matches!(result, Err(ServerError::ConfigInvalid { .. })));
    }

    #[tokio::test]
    async fn test_send_datagram_requires_running_and_registered() {
        let server = server(test_config());
        let client: ClientId = "127.0.0.1:9".parse().unwrap();

        assert!(matches!(
            server.send_datagram(client, b"x").await,
            Err(ServerError::ShuttingDown)
        ));

        server.start().await.unwrap();
        assert!(matches!(
            server.send_datagram(client, b"x").await,
            Err(ServerError::ConnectionNotFound(_))
        ));
        assert!(server.active_connections().is_empty());
        assert!(server.load().abs() < f64::EPSILON);
        server.stop().await;
    }
}
